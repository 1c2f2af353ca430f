//! Core data model: chain configuration, accounts, status, handles and
//! snapshot metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which EVM implementation backs a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Geth,
    Ganache,
}

impl ChainType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainType::Geth => "geth",
            ChainType::Ganache => "ganache",
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-funded account on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `"0x"` followed by 40 hex characters.
    pub address: String,
    /// Balance in wei.
    pub balance: u128,
    /// Private key, `"0x"`-less 64 hex characters. Absent for accounts
    /// whose key is held by the EVM's own keystore (Geth).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priv_key: Option<String>,
}

/// The immutable-after-start request describing one chain. Fields left
/// `None` at submission are filled in by the Resource Allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Assigned by the allocator; absent at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub chain_type: ChainType,
    #[serde(default = "default_accounts_requested")]
    pub accounts_requested: u32,
    #[serde(default)]
    pub block_mine_time_ms: u64,
    #[serde(default = "default_network_id")]
    pub network_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
    #[serde(default)]
    pub clean_on_stop: bool,
    /// Empty means "discard output".
    #[serde(default)]
    pub output_log_path: PathBuf,
    /// If set, the data directory is seeded from this snapshot before
    /// launch and no new accounts are created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

fn default_accounts_requested() -> u32 {
    1
}

fn default_network_id() -> u64 {
    999
}

impl ChainConfig {
    /// Basic shape validation that does not require any allocated
    /// resources: non-negative counts are enforced by the type system
    /// (`u32`/`u64`), so this only rejects the Ganache port mismatch that
    /// the caller might pass in before normalization.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let (ChainType::Ganache, Some(http), Some(ws)) =
            (self.chain_type, self.http_port, self.ws_port)
        {
            if http != ws {
                return Err(crate::error::Error::Validation(
                    "ganache requires http_port == ws_port".into(),
                ));
            }
        }
        Ok(())
    }

    /// Ganache invariant: `ws_port` always mirrors `http_port`. Called by
    /// the allocator before probing ports, so the allocator only ever
    /// probes one port for a Ganache chain.
    pub fn normalize(&mut self) {
        if self.chain_type == ChainType::Ganache {
            self.ws_port = self.http_port;
        }
    }
}

/// Per-chain state machine. See `spec` §4.4 for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Initializing,
    Active,
    SnapshotTaking,
    SnapshotReverting,
    Terminating,
    Stopped,
    Failed,
}

impl ChainStatus {
    /// Whether a user command may be accepted in this state. Only
    /// `Active` accepts new lifecycle commands; everything else answers
    /// `busy` or has already exited.
    pub fn accepts_commands(self) -> bool {
        matches!(self, ChainStatus::Active)
    }

    /// Whether the worker is still considered "live" for `stop` purposes.
    pub fn is_live(self) -> bool {
        !matches!(self, ChainStatus::Stopped | ChainStatus::Failed)
    }
}

/// Snapshot of a worker's externally-visible state, returned by `details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHandle {
    pub id: String,
    pub chain_type: ChainType,
    pub status: ChainStatus,
    pub accounts: Vec<Account>,
    pub coinbase: Option<String>,
    pub rpc_url: String,
    pub ws_url: String,
}

impl ChainHandle {
    pub fn coinbase_of(accounts: &[Account]) -> Option<String> {
        accounts.first().map(|a| a.address.clone())
    }
}

/// Metadata for an archived, indexed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDetails {
    /// Equals the archive's base filename (no `.tgz` extension).
    pub id: String,
    pub chain_type: ChainType,
    pub description: String,
    /// Absolute path to the `.tgz` archive.
    pub path: PathBuf,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
