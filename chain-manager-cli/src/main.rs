//! Command-line operator harness for `chain-manager`: a thin wrapper
//! around `ChainFacade` for scripting and manual testing, mirroring the
//! node/CLI split the library itself follows.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chain_manager::{ChainConfig, ChainFacade, ChainType, Error, ManagerConfig};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "chain-manager", about = "Manage local Ethereum test chains")]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// when omitted.
    #[structopt(long, short = "c")]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Start a new chain.
    Start {
        #[structopt(long, possible_values = &["geth", "ganache"])]
        r#type: String,
        #[structopt(long, default_value = "1")]
        accounts: u32,
        #[structopt(long, default_value = "0")]
        block_mine_time_ms: u64,
        #[structopt(long)]
        clean_on_stop: bool,
    },
    /// Stop a running chain.
    Stop { id: String },
    /// Snapshot operations.
    Snapshot(SnapshotCommand),
    /// Print a chain's handle (status, accounts, endpoints).
    Details { id: String },
    /// List every registered chain id.
    List,
    /// Print the EVM version string for a chain.
    Version { id: String },
}

#[derive(StructOpt)]
enum SnapshotCommand {
    /// Take a described snapshot of a chain's current state.
    Take {
        id: String,
        #[structopt(long, default_value = "")]
        description: String,
    },
    /// Revert a chain to a previously taken snapshot.
    Revert { id: String, snapshot_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::from_args();
    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

/// Runs the requested subcommand, adding file/operation context to any
/// error via `anyhow` before it reaches `report`. The library itself
/// never deals in `anyhow::Error`; this boundary is the only place the
/// two error styles meet.
async fn try_main(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    let facade = ChainFacade::new(config).context("initializing chain facade")?;
    run(&facade, cli.command).await?;
    Ok(())
}

async fn run(facade: &ChainFacade, command: Command) -> Result<(), Error> {
    match command {
        Command::Start {
            r#type,
            accounts,
            block_mine_time_ms,
            clean_on_stop,
        } => {
            let chain_type = match r#type.as_str() {
                "geth" => ChainType::Geth,
                "ganache" => ChainType::Ganache,
                other => return Err(Error::Validation(format!("unknown chain type: {}", other))),
            };
            let config = ChainConfig {
                id: None,
                chain_type,
                accounts_requested: accounts,
                block_mine_time_ms,
                network_id: 999,
                db_path: None,
                http_port: None,
                ws_port: None,
                clean_on_stop,
                output_log_path: PathBuf::new(),
                snapshot_id: None,
            };
            let id = facade.start(config).await?;
            println!("{}", id);
            Ok(())
        }
        Command::Stop { id } => facade.stop(&id).await,
        Command::Snapshot(SnapshotCommand::Take { id, description }) => {
            let details = facade.take_snapshot(&id, &description).await?;
            print_json(&details);
            Ok(())
        }
        Command::Snapshot(SnapshotCommand::Revert { id, snapshot_id }) => {
            let details = facade.snapshot_by_id(&snapshot_id)?;
            facade.revert_snapshot(&id, details).await
        }
        Command::Details { id } => {
            let handle = facade.details(&id).await?;
            print_json(&handle);
            Ok(())
        }
        Command::List => {
            for id in facade.list() {
                println!("{}", id);
            }
            Ok(())
        }
        Command::Version { id } => {
            println!("{}", facade.version(&id).await?);
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => log::error!("failed to serialize response: {}", e),
    }
}

fn report(error: anyhow::Error) -> ExitCode {
    eprintln!("error: {:#}", error);
    let code = error.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(70);
    ExitCode::from(code as u8)
}
