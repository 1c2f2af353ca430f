//! Chain Facade: the Chain Manager's public API surface. A thin
//! dispatcher: validates, delegates resource assignment to the
//! Allocator, asks the Supervisor to start a Worker, and routes every
//! subsequent call through the Registry to that Worker's mailbox.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::adapter::AdapterFactory;
use crate::allocator::ResourceAllocator;
use crate::bus::NotificationBus;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::registry::ChainRegistry;
use crate::snapshot::SnapshotManager;
use crate::supervisor::Supervisor;
use crate::types::{ChainConfig, ChainHandle, ChainType, SnapshotDetails};
use crate::worker::WorkerCommand;

/// Entry point for everything outside the core: the CLI binary, and (in
/// deployment) the WebSocket/HTTP gateway that is an external
/// collaborator to this crate (`spec.md` §1, §6).
#[derive(Clone)]
pub struct ChainFacade {
    manager: Arc<ManagerConfig>,
    registry: ChainRegistry,
    allocator: ResourceAllocator,
    supervisor: Supervisor,
    snapshots: SnapshotManager,
    bus: NotificationBus,
}

impl ChainFacade {
    /// Assembles a Facade from an already-loaded configuration, using the
    /// real Geth/Ganache adapters. Creates
    /// `base_path`/`snapshot_base_path`/`snapshot_db_path` if missing and
    /// opens the snapshot index; both are fatal-on-failure (`spec.md`
    /// §7) since nothing can run without them.
    pub fn new(manager: ManagerConfig) -> Result<Self> {
        Self::with_adapter_factory(manager, crate::adapter::default_factory())
    }

    /// Same as [`ChainFacade::new`], but with the `EvmAdapter` variant
    /// construction swapped out. Production callers should use `new`;
    /// this seam exists so tests can substitute a fake adapter backed by
    /// a short-lived process instead of a real Geth/Ganache binary.
    pub fn with_adapter_factory(manager: ManagerConfig, adapter_factory: AdapterFactory) -> Result<Self> {
        manager.ensure_paths()?;
        let manager = Arc::new(manager);
        let registry = ChainRegistry::new();
        let allocator = ResourceAllocator::new(manager.clone(), registry.clone());
        let bus = NotificationBus::new();
        let snapshots = SnapshotManager::open(
            manager.snapshot_base_path.clone(),
            &manager.snapshot_db_path,
        )?;
        let supervisor = Supervisor::new(
            manager.clone(),
            registry.clone(),
            bus.clone(),
            snapshots.clone(),
            adapter_factory,
        );
        Ok(Self {
            manager,
            registry,
            allocator,
            supervisor,
            snapshots,
            bus,
        })
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    /// Validates `config`, fills in id/ports/db_path, and asks the
    /// Supervisor to spawn a Worker for it. Returns as soon as the Worker
    /// task has been registered; it does **not** wait for the chain to
    /// reach `active`. Callers observe `started` on the bus (`spec.md`
    /// §4.9).
    pub async fn start(&self, mut config: ChainConfig) -> Result<String> {
        config.validate()?;
        config.normalize();

        if let Some(db_path) = &config.db_path {
            if self.allocator.db_path_in_use(db_path) {
                return Err(Error::ResourceConflict);
            }
        }
        match (config.http_port, config.ws_port) {
            (Some(http), Some(ws)) => {
                if self.registry.port_in_use(http)
                    || self.registry.port_in_use(ws)
                    || self.allocator.port_in_use(http)
                    || (ws != http && self.allocator.port_in_use(ws))
                {
                    return Err(Error::ResourceConflict);
                }
            }
            (None, None) => {
                let (http, ws) = self.allocator.allocate_ports()?;
                config.http_port = Some(http);
                config.ws_port = Some(if config.chain_type == ChainType::Ganache { http } else { ws });
            }
            _ => {
                return Err(Error::Validation(
                    "http_port and ws_port must both be set or both be absent".into(),
                ))
            }
        }

        let id = self.allocator.new_id();
        config.id = Some(id.clone());
        if config.db_path.is_none() {
            config.db_path = Some(self.manager.chain_db_path(&id));
        }

        self.supervisor.spawn_worker(config);
        Ok(id)
    }

    /// Stops a chain and waits for it to become `stopped` (bounded by
    /// `kill_timeout` inside the Worker's own adapter call).
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.call(id, |reply| WorkerCommand::Stop { reply }).await
    }

    pub async fn take_snapshot(&self, id: &str, description: &str) -> Result<SnapshotDetails> {
        let description = description.to_string();
        self.call(id, move |reply| WorkerCommand::TakeSnapshot { description, reply })
            .await
    }

    pub async fn revert_snapshot(&self, id: &str, details: SnapshotDetails) -> Result<()> {
        self.call(id, move |reply| WorkerCommand::RevertSnapshot { details, reply })
            .await
    }

    /// Looks up a previously indexed snapshot by id, for callers (like
    /// the CLI) that only have the snapshot id on hand and need the full
    /// `SnapshotDetails` to pass to `revert_snapshot`.
    pub fn snapshot_by_id(&self, snapshot_id: &str) -> Result<SnapshotDetails> {
        self.snapshots
            .by_id(snapshot_id)?
            .ok_or_else(|| Error::SnapshotFailure(format!("unknown snapshot id: {}", snapshot_id)))
    }

    pub async fn start_mine(&self, id: &str) -> Result<()> {
        self.call(id, |reply| WorkerCommand::StartMine { reply }).await
    }

    pub async fn stop_mine(&self, id: &str) -> Result<()> {
        self.call(id, |reply| WorkerCommand::StopMine { reply }).await
    }

    pub async fn details(&self, id: &str) -> Result<ChainHandle> {
        self.call(id, |reply| WorkerCommand::Details { reply }).await
    }

    /// Whether `id` currently has a live Worker registered. Answered
    /// directly from the Registry rather than round-tripping through the
    /// Worker's mailbox: the Registry's own insert-on-start/delete-on-exit
    /// discipline (`spec.md` §4.5) already is the authoritative answer,
    /// and unlike `stop`/`details` this query has a sensible answer
    /// (`false`) for an id that has already exited instead of needing to
    /// distinguish "gone" from "never existed".
    pub async fn alive(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    pub async fn version(&self, id: &str) -> Result<String> {
        self.call(id, |reply| WorkerCommand::Version { reply }).await
    }

    /// Every id currently registered, live or mid-transition.
    pub fn list(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Bounded shutdown of every registered chain. Intended for process
    /// shutdown (e.g. a `SIGTERM` handler in the CLI).
    pub async fn shutdown_all(&self) {
        self.supervisor.shutdown_all().await
    }

    /// Sends `build(reply)` to `id`'s mailbox and awaits the reply. A
    /// missing registry entry or a dropped mailbox both surface as
    /// `Error::UnknownChain`, since from the caller's perspective they
    /// are indistinguishable (the chain is simply not there to talk to).
    async fn call<T, F>(&self, id: &str, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> WorkerCommand,
    {
        let commands = self
            .registry
            .command_sender(id)
            .ok_or_else(|| Error::UnknownChain(id.to_string()))?;
        let (tx, rx) = oneshot::channel();
        commands
            .send(build(tx))
            .await
            .map_err(|_| Error::UnknownChain(id.to_string()))?;
        rx.await.map_err(|_| Error::UnknownChain(id.to_string()))?
    }
}

/// Writes opaque client metadata alongside a chain's data directory
/// (`spec.md` §6 persisted-state layout: `<base_path>/<id>/external.json`).
pub fn write_external_data(db_path: &Path, data: &serde_json::Value) -> Result<()> {
    let path = db_path.join("external.json");
    let bytes = serde_json::to_vec_pretty(data)
        .map_err(|e| Error::Fatal(format!("serializing external.json: {}", e)))?;
    std::fs::write(&path, bytes).map_err(|source| Error::Io { path, source })
}

/// Reads back what `write_external_data` wrote, or `null` if the chain
/// never had any external metadata recorded.
pub fn read_external_data(db_path: &Path) -> Result<serde_json::Value> {
    let path = db_path.join("external.json");
    if !path.exists() {
        return Ok(serde_json::Value::Null);
    }
    let bytes = std::fs::read(&path).map_err(|source| Error::Io { path: path.clone(), source })?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Fatal(format!("corrupt external.json at {}: {}", path.display(), e)))
}
