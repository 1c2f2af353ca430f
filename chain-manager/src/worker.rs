//! Chain Worker: the per-chain serialized command processor. Owns one
//! EVM Adapter instance and sequences every command for its chain
//! through a single mailbox, so no two operations on the same chain run
//! concurrently (`spec.md` §5).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::adapter::{self, AdapterState, EvmAdapter};
use crate::bus::{ChainEvent, NotificationBus, Topic};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotManager;
use crate::types::{Account, ChainConfig, ChainHandle, ChainStatus, SnapshotDetails};

/// A command sent to a Worker's mailbox. Each variant carries the
/// `oneshot` reply channel the caller awaits.
pub enum WorkerCommand {
    TakeSnapshot {
        description: String,
        reply: oneshot::Sender<Result<SnapshotDetails>>,
    },
    RevertSnapshot {
        details: SnapshotDetails,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    StartMine {
        reply: oneshot::Sender<Result<()>>,
    },
    StopMine {
        reply: oneshot::Sender<Result<()>>,
    },
    Details {
        reply: oneshot::Sender<ChainHandle>,
    },
    Version {
        reply: oneshot::Sender<String>,
    },
}

/// Capacity of a worker's command mailbox. Small on purpose: a worker
/// processes commands one at a time, so a deep backlog signals a client
/// bug more than it signals legitimate burst traffic.
pub const MAILBOX_CAPACITY: usize = 32;

struct WorkerState {
    id: String,
    config: ChainConfig,
    manager: Arc<ManagerConfig>,
    bus: NotificationBus,
    snapshots: SnapshotManager,
    adapter: Box<dyn EvmAdapter>,
    status: ChainStatus,
    adapter_state: Option<AdapterState>,
    accounts: Vec<Account>,
}

impl WorkerState {
    fn db_path(&self) -> std::path::PathBuf {
        self.config
            .db_path
            .clone()
            .unwrap_or_else(|| self.manager.chain_db_path(&self.id))
    }

    fn coinbase(&self) -> Option<String> {
        ChainHandle::coinbase_of(&self.accounts)
    }

    fn rpc_url(&self) -> String {
        self.config
            .http_port
            .map(|p| self.manager.rpc_url(p))
            .unwrap_or_default()
    }

    fn ws_url(&self) -> String {
        self.config
            .ws_port
            .map(|p| self.manager.ws_url(p))
            .unwrap_or_default()
    }

    fn handle(&self) -> ChainHandle {
        ChainHandle {
            id: self.id.clone(),
            chain_type: self.config.chain_type,
            status: self.status,
            accounts: self.accounts.clone(),
            coinbase: self.coinbase(),
            rpc_url: self.rpc_url(),
            ws_url: self.ws_url(),
        }
    }

    fn emit(&self, event: ChainEvent) {
        self.bus.publish_chain_event(&self.id, event);
    }

    fn set_status(&mut self, status: ChainStatus) {
        self.status = status;
        self.emit(ChainEvent::StatusChanged {
            id: self.id.clone(),
            status,
        });
    }

    fn emit_started(&self) {
        self.emit(ChainEvent::Started {
            id: self.id.clone(),
            accounts: self.accounts.clone(),
            coinbase: self.coinbase(),
            rpc_url: self.rpc_url(),
            ws_url: self.ws_url(),
        });
    }

    fn emit_error(&self, message: String) {
        self.emit(ChainEvent::Error {
            id: self.id.clone(),
            message,
        });
    }

    /// Runs `adapter.start`, updating `accounts`/`adapter_state` on
    /// success. Does not touch `status`; callers decide the
    /// transition (`init -> active` vs. `snapshot_taking -> active`).
    async fn launch(&mut self) -> Result<()> {
        let outcome = self.adapter.start(&self.config, &self.manager).await?;
        self.adapter_state = Some(outcome.state);
        self.accounts = outcome.accounts;
        Ok(())
    }

    /// Seeds `db_path` from a previously-taken snapshot before the very
    /// first launch, per `ChainConfig::snapshot_id` (`spec.md` §3: "no new
    /// accounts are created" when set). A no-op once `db_path` already has
    /// contents, so a crash-restart with the same config never re-seeds
    /// over live chain state.
    fn seed_from_snapshot(&self) -> Result<()> {
        let snapshot_id = match self.config.snapshot_id.as_deref() {
            Some(id) => id,
            None => return Ok(()),
        };
        let db_path = self.db_path();
        let is_empty = std::fs::read_dir(&db_path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true);
        if !is_empty {
            return Ok(());
        }
        let details = self.snapshots.by_id(snapshot_id)?.ok_or_else(|| {
            Error::SnapshotFailure(format!("unknown snapshot id: {}", snapshot_id))
        })?;
        self.snapshots.restore(&details, &db_path)
    }

    async fn do_stop(&mut self) -> Result<()> {
        if let Some(mut state) = self.adapter_state.take() {
            self.adapter.stop(&mut state, &self.manager).await?;
        }
        Ok(())
    }

    async fn do_take_snapshot(&mut self, description: &str) -> Result<SnapshotDetails> {
        self.do_stop().await?;
        let details = self
            .snapshots
            .take(self.config.chain_type, &self.db_path(), description)?;
        self.launch().await?;
        Ok(details)
    }

    async fn do_revert_snapshot(&mut self, details: &SnapshotDetails) -> Result<()> {
        self.do_stop().await?;
        self.snapshots.restore(details, &self.db_path())?;
        self.launch().await?;
        Ok(())
    }
}

/// How a Worker task ended, as reported to the Supervisor through its
/// `JoinHandle`. Only `Crashed` is eligible for the restart policy
/// (`spec.md` §4.6); every other exit (clean stop, a failed start, a
/// failed snapshot op) is terminal.
#[derive(Debug)]
pub enum WorkerExit {
    Stopped,
    Crashed(ChainConfig),
}

/// Runs one chain's lifecycle to completion. Spawned as its own task by
/// the Supervisor; returns once the chain is `stopped` or `failed`.
pub async fn run(
    id: String,
    config: ChainConfig,
    manager: Arc<ManagerConfig>,
    bus: NotificationBus,
    snapshots: SnapshotManager,
    adapter: Box<dyn EvmAdapter>,
    mut commands: mpsc::Receiver<WorkerCommand>,
) -> WorkerExit {
    let mut state = WorkerState {
        id: id.clone(),
        adapter,
        config,
        manager,
        bus,
        snapshots,
        status: ChainStatus::Initializing,
        adapter_state: None,
        accounts: Vec::new(),
    };

    if let Err(e) = state.seed_from_snapshot() {
        state.emit_error(e.to_string());
        state.set_status(ChainStatus::Failed);
        drain_with_busy(&mut commands).await;
        return WorkerExit::Stopped;
    }

    if let Err(e) = state.launch().await {
        state.emit_error(e.to_string());
        state.set_status(ChainStatus::Failed);
        drain_with_busy(&mut commands).await;
        return WorkerExit::Stopped;
    }
    state.set_status(ChainStatus::Active);
    state.emit_started();

    let mut exit = WorkerExit::Stopped;

    loop {
        let cmd = tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
            wait_result = crash_watch(state.adapter_state.as_mut()) => {
                state.adapter_state = None;
                state.emit_error(format!("EVM process exited unexpectedly: {:?}", wait_result));
                state.set_status(ChainStatus::Failed);
                drain_with_busy(&mut commands).await;
                exit = WorkerExit::Crashed(state.config.clone());
                break;
            }
        };
        match cmd {
            WorkerCommand::TakeSnapshot { description, reply } => {
                if !state.status.accepts_commands() {
                    let _ = reply.send(Err(Error::Busy));
                    continue;
                }
                state.status = ChainStatus::SnapshotTaking;
                match state.do_take_snapshot(&description).await {
                    Ok(details) => {
                        state.emit(ChainEvent::SnapshotTaken {
                            id: state.id.clone(),
                            details: details.clone(),
                        });
                        state.set_status(ChainStatus::Active);
                        state.emit_started();
                        let _ = reply.send(Ok(details));
                    }
                    Err(e) => {
                        state.emit_error(e.to_string());
                        state.set_status(ChainStatus::Failed);
                        let _ = reply.send(Err(e));
                        break;
                    }
                }
            }
            WorkerCommand::RevertSnapshot { details, reply } => {
                if !state.status.accepts_commands() {
                    let _ = reply.send(Err(Error::Busy));
                    continue;
                }
                state.status = ChainStatus::SnapshotReverting;
                match state.do_revert_snapshot(&details).await {
                    Ok(()) => {
                        state.emit(ChainEvent::SnapshotReverted {
                            id: state.id.clone(),
                            details: details.clone(),
                        });
                        state.set_status(ChainStatus::Active);
                        state.emit_started();
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        state.emit_error(e.to_string());
                        state.set_status(ChainStatus::Failed);
                        let _ = reply.send(Err(e));
                        break;
                    }
                }
            }
            // A `stop` that arrives while a snapshot op is in flight never
            // reaches this arm mid-op: the mailbox isn't read again until
            // the current command's handler returns, so by the time this
            // is matched `status` has already settled back to `active` (or
            // `failed`, on a snapshot error). The net effect is exactly
            // the "queued, runs after the op completes" semantics
            // (`spec.md` §4.4) without extra bookkeeping.
            WorkerCommand::Stop { reply } => {
                if state.status.is_live() {
                    finish_stop(&mut state, reply).await;
                    break;
                } else {
                    let _ = reply.send(Err(Error::Busy));
                }
            }
            WorkerCommand::StartMine { reply } => {
                let result = if state.status.accepts_commands() {
                    match &state.adapter_state {
                        Some(s) => state.adapter.start_mine(s).await,
                        None => Err(Error::Busy),
                    }
                } else {
                    Err(Error::Busy)
                };
                let _ = reply.send(result);
            }
            WorkerCommand::StopMine { reply } => {
                let result = if state.status.accepts_commands() {
                    match &state.adapter_state {
                        Some(s) => state.adapter.stop_mine(s).await,
                        None => Err(Error::Busy),
                    }
                } else {
                    Err(Error::Busy)
                };
                let _ = reply.send(result);
            }
            WorkerCommand::Details { reply } => {
                let _ = reply.send(state.handle());
            }
            WorkerCommand::Version { reply } => {
                let _ = reply.send(state.adapter.version().to_string());
            }
        }
    }

    if state.status == ChainStatus::Stopped && state.config.clean_on_stop {
        let _ = std::fs::remove_dir_all(state.db_path());
    }
    exit
}

/// Races against the child EVM's own exit so an unexpected crash is
/// observed even while the Worker is otherwise idle, instead of only
/// being noticed the next time a command happens to be processed. Stays
/// pending forever when there is no child to watch (mid-snapshot, where
/// the adapter is synchronously stopped-and-relaunched outside this
/// select loop), which simply disables this branch for that window.
async fn crash_watch(
    adapter_state: Option<&mut AdapterState>,
) -> std::io::Result<std::process::ExitStatus> {
    match adapter_state {
        Some(state) => state.child.wait().await,
        None => std::future::pending().await,
    }
}

/// Shared tail of the `stop` transition: `active -> terminating ->
/// stopped`, bounded by the adapter's own `kill_timeout`-respecting
/// `stop`/`terminate` implementations.
async fn finish_stop(state: &mut WorkerState, reply: oneshot::Sender<Result<()>>) {
    state.set_status(ChainStatus::Terminating);
    let result = state.do_stop().await;
    state.status = ChainStatus::Stopped;
    state.emit(ChainEvent::Stopped {
        id: state.id.clone(),
    });
    let _ = reply.send(result);
}

/// Answers every already-queued command with `busy` instead of simply
/// dropping the mailbox, so callers blocked on a reply are not left
/// hanging after an init failure.
async fn drain_with_busy(commands: &mut mpsc::Receiver<WorkerCommand>) {
    while let Ok(cmd) = commands.try_recv() {
        reply_busy(cmd);
    }
}

fn reply_busy(cmd: WorkerCommand) {
    match cmd {
        WorkerCommand::TakeSnapshot { reply, .. } => {
            let _ = reply.send(Err(Error::Busy));
        }
        WorkerCommand::RevertSnapshot { reply, .. } => {
            let _ = reply.send(Err(Error::Busy));
        }
        WorkerCommand::Stop { reply } => {
            let _ = reply.send(Err(Error::Busy));
        }
        WorkerCommand::StartMine { reply } | WorkerCommand::StopMine { reply } => {
            let _ = reply.send(Err(Error::Busy));
        }
        WorkerCommand::Details { reply } => {
            // Best-effort: a `details` call after an init failure has no
            // handle to report, so the sender is simply dropped and the
            // caller observes a closed channel.
            drop(reply);
        }
        WorkerCommand::Version { reply } => {
            drop(reply);
        }
    }
}

pub fn spawn(
    id: String,
    config: ChainConfig,
    manager: Arc<ManagerConfig>,
    bus: NotificationBus,
    snapshots: SnapshotManager,
    adapter: Box<dyn EvmAdapter>,
) -> (mpsc::Sender<WorkerCommand>, tokio::task::JoinHandle<WorkerExit>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let join = tokio::spawn(run(id, config, manager, bus, snapshots, adapter, rx));
    (tx, join)
}
