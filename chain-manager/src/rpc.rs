//! Minimal JSON-RPC client used for the readiness probe and for the
//! mining / internal-snapshot calls an adapter issues against its own
//! child EVM. This is the narrow slice of the "JSON-RPC client used to
//! talk to a running EVM" collaborator that `spec.md` §1 calls out as
//! external; the Chain Manager only ever talks to its own children.

use std::time::Duration;

use jsonrpsee_core::client::ClientT;
use jsonrpsee_core::params::ArrayParams;
use jsonrpsee_http_client::{HttpClient, HttpClientBuilder};
use serde_json::Value;

use crate::error::{Error, Result};

/// Thin wrapper around an `HttpClient` bound to one chain's `http_port`.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: HttpClient,
}

impl RpcClient {
    pub fn new(http_port: u16) -> Result<Self> {
        let url = format!("http://localhost:{}", http_port);
        let inner = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(5))
            .build(url)
            .map_err(|e| Error::StartFailure(format!("building rpc client: {}", e)))?;
        Ok(Self { inner })
    }

    async fn call(&self, method: &str, params: ArrayParams) -> Result<Value> {
        self.inner
            .request(method, params)
            .await
            .map_err(|e| Error::RuntimeCrash(format!("rpc call {} failed: {}", method, e)))
    }

    /// The readiness probe: a bare `eth_blockNumber` round trip. Returns
    /// `Ok(())` only on a successful response; any transport or protocol
    /// error is treated as "not ready yet" by the caller's backoff loop.
    pub async fn probe_ready(&self) -> Result<()> {
        self.call("eth_blockNumber", ArrayParams::new()).await?;
        Ok(())
    }

    pub async fn miner_start(&self) -> Result<()> {
        let mut params = ArrayParams::new();
        params.insert(1).ok();
        self.call("miner_start", params).await?;
        Ok(())
    }

    pub async fn miner_stop(&self) -> Result<()> {
        self.call("miner_stop", ArrayParams::new()).await?;
        Ok(())
    }

    pub async fn evm_snapshot(&self) -> Result<String> {
        let value = self.call("evm_snapshot", ArrayParams::new()).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::SnapshotFailure("evm_snapshot: unexpected response shape".into()))
    }

    pub async fn evm_revert(&self, snapshot_id: &str) -> Result<()> {
        let mut params = ArrayParams::new();
        params.insert(snapshot_id).ok();
        self.call("evm_revert", params).await?;
        Ok(())
    }

    pub async fn block_number(&self) -> Result<u64> {
        let value = self.call("eth_blockNumber", ArrayParams::new()).await?;
        let text = value
            .as_str()
            .ok_or_else(|| Error::RuntimeCrash("eth_blockNumber: unexpected response shape".into()))?;
        u64::from_str_radix(text.trim_start_matches("0x"), 16)
            .map_err(|e| Error::RuntimeCrash(format!("eth_blockNumber: {}", e)))
    }
}

/// Polls `probe_ready` with exponential backoff (initial 100ms, factor 2,
/// capped at 2s) until it succeeds or `deadline` elapses.
pub async fn wait_ready(client: &RpcClient, deadline: Duration) -> Result<()> {
    let start = tokio::time::Instant::now();
    let mut backoff = Duration::from_millis(100);
    loop {
        if client.probe_ready().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() >= deadline {
            return Err(Error::StartFailure(
                "readiness probe did not succeed within kill_timeout".into(),
            ));
        }
        tokio::time::sleep(backoff.min(deadline.saturating_sub(start.elapsed()))).await;
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
}
