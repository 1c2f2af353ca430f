//! EVM Adapter: polymorphic over {Geth, Ganache}. Builds the launch
//! command for one EVM, spawns it as a child process, issues start/stop
//! mining and internal-snapshot commands, parses readiness, and
//! terminates it.

pub mod ganache;
pub mod geth;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use crate::types::{Account, ChainConfig};

/// Everything a running adapter needs to remember between calls: the
/// child process handle and an RPC client bound to its ports. Owned
/// exclusively by the Worker that started the adapter.
pub struct AdapterState {
    pub child: Child,
    pub rpc: RpcClient,
}

impl std::fmt::Debug for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterState")
            .field("pid", &self.child.id())
            .finish()
    }
}

/// Result of a successful `start`.
pub struct StartOutcome {
    pub state: AdapterState,
    pub accounts: Vec<Account>,
}

/// Capability set every EVM variant must implement. Operations a
/// variant does not support (e.g. Geth's internal snapshots) return
/// `Error::Unsupported` rather than silently succeeding (`spec.md` §9).
#[async_trait]
pub trait EvmAdapter: Send + Sync {
    /// Spawns the child process, provisions accounts, and blocks (with
    /// the caller's deadline) until the readiness probe succeeds.
    async fn start(&self, config: &ChainConfig, manager: &ManagerConfig) -> Result<StartOutcome>;

    /// Cooperative-then-forceful stop: the precise mechanism is
    /// EVM-specific (Geth: stdin `exit`; Ganache: process signal), but
    /// both variants bound the wait by `manager.kill_timeout()`.
    async fn stop(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()>;

    async fn start_mine(&self, state: &AdapterState) -> Result<()>;
    async fn stop_mine(&self, state: &AdapterState) -> Result<()>;

    /// Ganache-only; Geth returns `Unsupported`.
    async fn take_internal_snapshot(&self, state: &AdapterState) -> Result<String> {
        let _ = state;
        Err(Error::Unsupported("internal snapshots"))
    }

    /// Ganache-only; Geth returns `Unsupported`.
    async fn revert_internal_snapshot(&self, state: &AdapterState, id: &str) -> Result<()> {
        let _ = (state, id);
        Err(Error::Unsupported("internal snapshots"))
    }

    /// Forcibly ends the child process within `manager.kill_timeout()`,
    /// regardless of the cooperative `stop` protocol's outcome.
    async fn terminate(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()>;

    fn version(&self) -> &'static str;
}

/// Builds the concrete adapter for a chain's configured EVM type.
pub fn for_chain_type(chain_type: crate::types::ChainType) -> Box<dyn EvmAdapter> {
    match chain_type {
        crate::types::ChainType::Geth => Box::new(geth::GethAdapter),
        crate::types::ChainType::Ganache => Box::new(ganache::GanacheAdapter),
    }
}

/// A pluggable source of adapters, threaded from `ChainFacade` through
/// the `Supervisor` down to each `Worker`. Production code always uses
/// [`default_factory`]; tests substitute one that returns a fake adapter
/// backed by a short-lived process instead of a real Geth/Ganache binary.
pub type AdapterFactory = Arc<dyn Fn(crate::types::ChainType) -> Box<dyn EvmAdapter> + Send + Sync>;

pub fn default_factory() -> AdapterFactory {
    Arc::new(for_chain_type)
}

/// Shared readiness wait used by both adapters after spawning the child.
pub(crate) async fn wait_for_readiness(rpc: &RpcClient, kill_timeout: Duration) -> Result<()> {
    crate::rpc::wait_ready(rpc, kill_timeout).await
}

/// Discards stdout/stderr when `output_log_path` is empty, otherwise
/// appends to the configured file. Shared by both adapters when building
/// their `Command`.
pub(crate) fn output_stdio(output_log_path: &std::path::Path) -> std::process::Stdio {
    if output_log_path.as_os_str().is_empty() {
        std::process::Stdio::null()
    } else {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_log_path)
            .map(std::process::Stdio::from)
            .unwrap_or_else(|_| std::process::Stdio::null())
    }
}

/// The password file used to unlock every Geth account. Shared across
/// chains by design: it holds no key material of its own, only the
/// fixed password `geth account new`/`--unlock` expect, so there is no
/// reason to fragment it per `db_path` (`spec.md` §6 configuration).
pub(crate) fn password_file_for(manager: &ManagerConfig, _db_path: &std::path::Path) -> PathBuf {
    manager.geth_password_file.clone()
}
