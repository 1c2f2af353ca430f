//! Shared test harness: a `FakeAdapter` standing in for a real
//! Geth/Ganache binary, so the Worker/Supervisor/Bus state machine can be
//! exercised end-to-end without shelling out to either EVM.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use chain_manager::adapter::{AdapterFactory, AdapterState, EvmAdapter, StartOutcome};
use chain_manager::rpc::RpcClient;
use chain_manager::{Account, ChainConfig, Error, ManagerConfig, Result};

/// Spawns `sleep 600` in place of a real EVM child process and reports
/// readiness immediately, so tests never depend on a live JSON-RPC
/// server. `fail_start` flips `start` into the "EVM failed to become
/// ready" scenario (`spec.md` §8 S4) without needing a binary that
/// actually exits non-zero.
pub struct FakeAdapter {
    pub fail_start: bool,
}

#[async_trait]
impl EvmAdapter for FakeAdapter {
    async fn start(&self, config: &ChainConfig, _manager: &ManagerConfig) -> Result<StartOutcome> {
        if self.fail_start {
            return Err(Error::StartFailure("fake adapter configured to fail".into()));
        }
        let db_path = config
            .db_path
            .clone()
            .expect("db_path must be allocated before start");
        std::fs::create_dir_all(&db_path).map_err(|source| Error::Io {
            path: db_path.clone(),
            source,
        })?;

        let child = Command::new("sleep")
            .arg("600")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::StartFailure(format!("spawning fake child: {}", e)))?;
        let rpc = RpcClient::new(config.http_port.unwrap_or(0))?;

        let count = config.accounts_requested.max(1);
        let accounts = (0..count)
            .map(|n| Account {
                address: format!("0x{:040x}", n + 1),
                balance: 0,
                priv_key: None,
            })
            .collect();

        Ok(StartOutcome {
            state: AdapterState { child, rpc },
            accounts,
        })
    }

    async fn stop(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        self.terminate(state, manager).await
    }

    async fn start_mine(&self, _state: &AdapterState) -> Result<()> {
        Ok(())
    }

    async fn stop_mine(&self, _state: &AdapterState) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        let _ = state.child.start_kill();
        let _ = tokio::time::timeout(manager.kill_timeout(), state.child.wait()).await;
        Ok(())
    }

    fn version(&self) -> &'static str {
        "fake"
    }
}

pub fn always_ok_factory() -> AdapterFactory {
    Arc::new(|_| Box::new(FakeAdapter { fail_start: false }))
}

pub fn always_fail_factory() -> AdapterFactory {
    Arc::new(|_| Box::new(FakeAdapter { fail_start: true }))
}

/// A `ManagerConfig` rooted under a fresh temp dir, with a short
/// `kill_timeout` so failure-path tests don't sit around for 180s.
pub fn test_manager(dir: &std::path::Path) -> ManagerConfig {
    ManagerConfig {
        base_path: dir.join("chains"),
        snapshot_base_path: dir.join("snapshots"),
        snapshot_db_path: dir.join("snapshot-index"),
        kill_timeout_ms: 3_000,
        ..ManagerConfig::default()
    }
}
