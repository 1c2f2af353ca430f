//! Chain Supervisor: spawns Workers, restarts them on unexpected crash
//! (rate-limited), and tears them down within the configured kill
//! timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use crate::adapter::AdapterFactory;
use crate::bus::NotificationBus;
use crate::config::ManagerConfig;
use crate::registry::{ChainRegistry, WorkerHandle};
use crate::snapshot::SnapshotManager;
use crate::types::ChainConfig;
use crate::worker::{self, WorkerCommand, WorkerExit};

/// Restarts allowed within `RESTART_WINDOW` before a chain is given up on
/// and left `failed` (`spec.md` §4.6).
const MAX_RESTARTS: usize = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Owns the restart-rate bookkeeping and drives Worker lifecycle. One
/// Supervisor serves every chain in a process; it never blocks on a
/// Worker's own command mailbox, only on spawning/awaiting it.
#[derive(Clone)]
pub struct Supervisor {
    manager: Arc<ManagerConfig>,
    registry: ChainRegistry,
    bus: NotificationBus,
    snapshots: SnapshotManager,
    adapter_factory: AdapterFactory,
    restarts: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl Supervisor {
    pub fn new(
        manager: Arc<ManagerConfig>,
        registry: ChainRegistry,
        bus: NotificationBus,
        snapshots: SnapshotManager,
        adapter_factory: AdapterFactory,
    ) -> Self {
        Self {
            manager,
            registry,
            bus,
            snapshots,
            adapter_factory,
            restarts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a Worker for `config` (which must already carry an
    /// allocated id, ports and db_path), registers it, and spawns a
    /// watcher task that applies the restart policy once the Worker
    /// exits. Returns immediately; callers do not wait for `started`.
    pub fn spawn_worker(&self, config: ChainConfig) {
        self.launch(config);
    }

    fn launch(&self, config: ChainConfig) {
        let id = config
            .id
            .clone()
            .expect("config must be allocated before spawn_worker");
        let http_port = config.http_port.unwrap_or_default();
        let ws_port = config.ws_port.unwrap_or_default();
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| self.manager.chain_db_path(&id));

        let adapter = (self.adapter_factory)(config.chain_type);
        let (commands, join) = worker::spawn(
            id.clone(),
            config,
            self.manager.clone(),
            self.bus.clone(),
            self.snapshots.clone(),
            adapter,
        );
        let abort = join.abort_handle();

        self.registry.insert(
            id.clone(),
            WorkerHandle {
                commands,
                db_path,
                http_port,
                ws_port,
                abort,
            },
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.watch(id, join).await;
        });
    }

    /// Awaits a single Worker task to completion. A clean stop or a
    /// terminal failure removes the chain for good; an unexpected crash
    /// is re-spawned with the same `ChainConfig` as long as the restart
    /// rate policy allows it, otherwise the chain is left `failed` and
    /// its resources released (`spec.md` §4.6).
    async fn watch(&self, id: String, join: tokio::task::JoinHandle<WorkerExit>) {
        let exit = join.await;
        self.registry.remove(&id);
        match exit {
            Ok(WorkerExit::Crashed(config)) => {
                if self.record_restart_attempt(&id).await {
                    log::info!("restarting chain {} after an unexpected crash", id);
                    self.launch(config);
                } else {
                    log::warn!("chain {} exceeded its restart budget, leaving it failed", id);
                }
            }
            Ok(WorkerExit::Stopped) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                log::warn!("worker task for chain {} panicked: {}", id, e);
            }
        }
    }

    /// Bounded shutdown of a live chain: sends it the same `Stop` command
    /// a normal caller would, then waits up to `kill_timeout` for the
    /// reply. If the worker never replies (mailbox full, task wedged, or
    /// already gone), its task is aborted outright, matching the
    /// `tokio::time::timeout(kill_timeout, ...)` then `abort()` fallback
    /// `spec.md` §4.6 describes.
    pub async fn shutdown_worker(&self, id: &str) {
        let handle = match self.registry.remove(id) {
            Some(handle) => handle,
            None => return,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = handle
            .commands
            .send(WorkerCommand::Stop { reply: reply_tx })
            .await
            .is_ok();
        let completed = sent
            && tokio::time::timeout(self.manager.kill_timeout(), reply_rx)
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
        if !completed {
            log::warn!("chain {} did not stop within the kill timeout, aborting its task", id);
            handle.abort.abort();
        }
    }

    /// Tears down every registered chain, bounded by `kill_timeout` each.
    /// Used at process shutdown.
    pub async fn shutdown_all(&self) {
        for id in self.registry.ids() {
            self.shutdown_worker(&id).await;
        }
    }

    /// Records an unexpected-exit timestamp for `id` and reports whether
    /// a restart is still within policy: at most `MAX_RESTARTS` within a
    /// sliding `RESTART_WINDOW`.
    async fn record_restart_attempt(&self, id: &str) -> bool {
        let mut restarts = self.restarts.lock().await;
        let window = restarts.entry(id.to_string()).or_insert_with(VecDeque::new);
        let now = Instant::now();
        while let Some(&front) = window.front() {
            if now.duration_since(front) > RESTART_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= MAX_RESTARTS {
            return false;
        }
        window.push_back(now);
        true
    }
}
