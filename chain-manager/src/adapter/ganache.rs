//! Ganache adapter: spawns the wrapper script with deterministic
//! accounts, internal snapshots via `evm_snapshot`/`evm_revert`.

use async_trait::async_trait;
use tokio::process::Command;

use super::{output_stdio, wait_for_readiness, AdapterState, EvmAdapter, StartOutcome};
use crate::accounts::AccountProvisioner;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use crate::types::ChainConfig;

pub struct GanacheAdapter;

#[async_trait]
impl EvmAdapter for GanacheAdapter {
    async fn start(&self, config: &ChainConfig, manager: &ManagerConfig) -> Result<StartOutcome> {
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

        // Ganache invariant: ws_port mirrors http_port. `ChainConfig::normalize`
        // is applied by the allocator before this point, but re-derive here
        // defensively since the adapter is the authoritative consumer.
        let http_port = config
            .http_port
            .ok_or_else(|| Error::Validation("http_port must be allocated before start".into()))?;

        // Ganache accounts are fully deterministic from `accounts_requested`
        // and the fixed dev mnemonic, so even when `db_path` was just seeded
        // from a snapshot the same list is simply recomputed rather than
        // read back from a keystore (`spec.md` §3: "no new accounts are
        // created" means no new *key material*, not an empty account list).
        let accounts = AccountProvisioner::ganache_accounts(config.accounts_requested)?;

        // The wrapper script (not `ganache-cli` directly) is the thing
        // actually spawned; it is expected to exec the binary at
        // `manager.ganache_executable` internally (`spec.md` §4.3/§6).
        let mut command = Command::new(&manager.ganache_wrapper_script);
        command
            .arg("--port")
            .arg(http_port.to_string())
            .arg("--networkId")
            .arg(config.network_id.to_string())
            .arg("--db")
            .arg(&db_path)
            .arg("--blockTime")
            .arg((config.block_mine_time_ms / 1000).to_string());

        for account in &accounts {
            if let Some(key) = &account.priv_key {
                command.arg("--account").arg(format!("{},{}", key, account.balance));
            }
        }

        command
            .stdout(output_stdio(&config.output_log_path))
            .stderr(output_stdio(&config.output_log_path));

        let child = command
            .spawn()
            .map_err(|e| Error::StartFailure(format!("spawning ganache: {}", e)))?;

        let rpc = RpcClient::new(http_port)?;
        wait_for_readiness(&rpc, manager.kill_timeout()).await?;

        Ok(StartOutcome {
            state: AdapterState { child, rpc },
            accounts,
        })
    }

    async fn stop(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        self.terminate(state, manager).await
    }

    async fn start_mine(&self, state: &AdapterState) -> Result<()> {
        state.rpc.miner_start().await
    }

    async fn stop_mine(&self, state: &AdapterState) -> Result<()> {
        state.rpc.miner_stop().await
    }

    async fn take_internal_snapshot(&self, state: &AdapterState) -> Result<String> {
        state.rpc.evm_snapshot().await
    }

    async fn revert_internal_snapshot(&self, state: &AdapterState, id: &str) -> Result<()> {
        state.rpc.evm_revert(id).await
    }

    async fn terminate(&self, state: &mut AdapterState, manager: &ManagerConfig) -> Result<()> {
        let _ = state.child.start_kill();
        let _ = tokio::time::timeout(manager.kill_timeout(), state.child.wait()).await;
        Ok(())
    }

    fn version(&self) -> &'static str {
        "ganache"
    }
}
