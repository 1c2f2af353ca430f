//! Chain Registry: the process-wide `id -> worker handle` map.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::worker::WorkerCommand;

/// Everything the Registry (and the Allocator, via it) needs to know
/// about a live worker without messaging it: its command mailbox, the
/// resources it exclusively owns, and an abort handle for forced
/// shutdown. The config needed to re-spawn a Worker after an unexpected
/// crash travels with `WorkerExit::Crashed` instead of living here, since
/// the Supervisor's watcher already holds it at the point it decides to
/// restart. The task's `JoinHandle` itself is owned by the Supervisor's
/// watcher task, not stored here, since only one place may await it.
#[derive(Debug)]
pub struct WorkerHandle {
    pub commands: mpsc::Sender<WorkerCommand>,
    pub db_path: PathBuf,
    pub http_port: u16,
    pub ws_port: u16,
    pub abort: AbortHandle,
}

/// Maps chain id to live `WorkerHandle`. Backed by `DashMap`, the
/// sharded concurrent map used for this exact shape elsewhere in the
/// pack (reth's node registries): fine-grained locking per shard, no
/// single global writer lock.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    workers: std::sync::Arc<DashMap<String, WorkerHandle>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: String, handle: WorkerHandle) {
        self.workers.insert(id, handle);
    }

    pub fn remove(&self, id: &str) -> Option<WorkerHandle> {
        self.workers.remove(id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    pub fn command_sender(&self, id: &str) -> Option<mpsc::Sender<WorkerCommand>> {
        self.workers.get(id).map(|entry| entry.commands.clone())
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        self.workers
            .iter()
            .any(|entry| entry.http_port == port || entry.ws_port == port)
    }

    pub fn path_in_use(&self, path: &Path) -> bool {
        self.workers.iter().any(|entry| entry.db_path == path)
    }

    pub fn ids(&self) -> Vec<String> {
        self.workers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(port: u16) -> (WorkerHandle, mpsc::Receiver<WorkerCommand>) {
        let (tx, rx) = mpsc::channel(1);
        let join = tokio::spawn(async {});
        let abort = join.abort_handle();
        (
            WorkerHandle {
                commands: tx,
                db_path: PathBuf::from(format!("/tmp/chains/{}", port)),
                http_port: port,
                ws_port: port + 1,
                abort,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn insert_and_lookup_roundtrip() {
        let registry = ChainRegistry::new();
        let (h, _rx) = handle(9000);
        registry.insert("1".into(), h);
        assert!(registry.contains("1"));
        assert!(registry.port_in_use(9000));
        assert!(registry.path_in_use(&PathBuf::from("/tmp/chains/9000")));
        assert!(!registry.port_in_use(9999));

        let removed = registry.remove("1");
        assert!(removed.is_some());
        assert!(!registry.contains("1"));
    }
}
