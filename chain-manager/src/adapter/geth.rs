//! Geth adapter: `geth --dev ... console`, stdin `exit` to stop, mining
//! toggled over JSON-RPC.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{output_stdio, password_file_for, wait_for_readiness, AdapterState, EvmAdapter, StartOutcome};
use crate::accounts::AccountProvisioner;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use crate::types::ChainConfig;

const GETH_RPC_APIS: &str = "admin,personal,eth,miner,debug,txpool,net";

pub struct GethAdapter;

#[async_trait]
impl EvmAdapter for GethAdapter {
    async fn start(&self, config: &ChainConfig, manager: &ManagerConfig) -> Result<super::StartOutcome> {
        let id = config
            .id
            .as_ref()
            .ok_or_else(|| Error::Validation("chain id must be assigned before start".into()))?;
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| manager.chain_db_path(id));
        std::fs::create_dir_all(&db_path).map_err(|source| Error::Io {
            path: db_path.clone(),
            source,
        })?;

        let password_file = password_file_for(manager, &db_path);
        if !password_file.exists() {
            let mut file = std::fs::File::create(&password_file).map_err(|source| Error::Io {
                path: password_file.clone(),
                source,
            })?;
            writeln!(file, "chainmanager").map_err(|source| Error::Io {
                path: password_file.clone(),
                source,
            })?;
        }

        let http_port = config
            .http_port
            .ok_or_else(|| Error::Validation("http_port must be allocated before start".into()))?;
        let ws_port = config
            .ws_port
            .ok_or_else(|| Error::Validation("ws_port must be allocated before start".into()))?;

        let accounts = if config.snapshot_id.is_some() {
            AccountProvisioner::geth_accounts(
                &manager.geth_executable,
                &db_path,
                &password_file,
                0,
            )
            .await?
        } else {
            AccountProvisioner::geth_accounts(
                &manager.geth_executable,
                &db_path,
                &password_file,
                config.accounts_requested,
            )
            .await?
        };

        if accounts.is_empty() {
            return Err(Error::StartFailure("no accounts available to unlock".into()));
        }
        let unlock_list = accounts
            .iter()
            .map(|a| a.address.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let etherbase = &accounts[0].address;

        let mut command = Command::new(&manager.geth_executable);
        command
            .arg("--dev")
            .arg("--datadir")
            .arg(&db_path)
            .arg("--networkid")
            .arg(config.network_id.to_string())
            .arg("--ipcdisable")
            .arg("--rpc")
            .arg("--rpcport")
            .arg(http_port.to_string())
            .arg("--rpcapi")
            .arg(GETH_RPC_APIS)
            .arg("--ws")
            .arg("--wsport")
            .arg(ws_port.to_string())
            .arg("--wsorigins=*")
            .arg("--gasprice=2000000000")
            .arg("--targetgaslimit=9000000000000")
            .arg(format!("--password={}", password_file.display()))
            .arg(format!("--etherbase={}", etherbase))
            .arg(format!("--unlock={}", unlock_list))
            .arg("console");

        if config.block_mine_time_ms > 0 {
            command.arg(format!("--dev.period={}", config.block_mine_time_ms));
        }

        command
            .stdin(std::process::Stdio::piped())
            .stdout(output_stdio(&config.output_log_path))
            .stderr(output_stdio(&config.output_log_path));

        let child = command
            .spawn()
            .map_err(|e| Error::StartFailure(format!("spawning geth: {}", e)))?;

        let rpc = RpcClient::new(http_port)?;
        wait_for_readiness(&rpc, manager.kill_timeout()).await?;

        Ok(StartOutcome {
            state: AdapterState { child, rpc },
            accounts,
        })
    }

    async fn stop(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        if let Some(mut stdin) = state.child.stdin.take() {
            let _ = stdin.write_all(b"exit\n").await;
        }
        let waited = tokio::time::timeout(Duration::from_secs(5), state.child.wait()).await;
        if waited.is_err() {
            self.terminate(state, manager).await?;
        }
        Ok(())
    }

    async fn start_mine(&self, state: &AdapterState) -> Result<()> {
        state.rpc.miner_start().await
    }

    async fn stop_mine(&self, state: &AdapterState) -> Result<()> {
        state.rpc.miner_stop().await
    }

    async fn terminate(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        let _ = state.child.start_kill();
        let _ = tokio::time::timeout(manager.kill_timeout(), state.child.wait()).await;
        Ok(())
    }

    fn version(&self) -> &'static str {
        "geth"
    }
}
