//! Operator-provided configuration for the Chain Manager.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration, typically loaded once at startup from a TOML
/// file (see `ManagerConfig::load`) and shared read-only across the
/// Allocator, Supervisor and Snapshot Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub base_path: PathBuf,
    pub snapshot_base_path: PathBuf,
    pub snapshot_db_path: PathBuf,
    pub kill_timeout_ms: u64,
    pub front_url: String,
    pub evm_port_range: (u16, u16),
    pub geth_executable: PathBuf,
    pub ganache_executable: PathBuf,
    pub geth_password_file: PathBuf,
    pub ganache_wrapper_script: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        // The source code's two conflicting dynamic port ranges
        // (7000-8999 internally vs. 8500-8600 in operator-facing config,
        // `spec.md` §9) are unified here: the operator-facing default
        // wins, since it is the one documented for deployment.
        Self {
            base_path: PathBuf::from("/tmp/chains"),
            snapshot_base_path: PathBuf::from("/tmp/snapshots"),
            snapshot_db_path: PathBuf::from("/tmp/db/snapshots"),
            kill_timeout_ms: 180_000,
            front_url: "localhost".to_string(),
            evm_port_range: (8500, 8600),
            geth_executable: PathBuf::from("geth"),
            ganache_executable: PathBuf::from("ganache-cli"),
            geth_password_file: PathBuf::from("/tmp/chains/geth.password"),
            ganache_wrapper_script: PathBuf::from("ganache-wrapper"),
        }
    }
}

impl ManagerConfig {
    /// Loads configuration from a TOML file, falling back field-by-field
    /// to `Default` for anything the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents)
            .map_err(|e| Error::Validation(format!("invalid config at {}: {}", path.display(), e)))
    }

    pub fn kill_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.evm_port_range.0..=self.evm_port_range.1
    }

    pub fn rpc_url(&self, http_port: u16) -> String {
        format!("http://{}:{}", self.front_url, http_port)
    }

    pub fn ws_url(&self, ws_port: u16) -> String {
        format!("ws://{}:{}", self.front_url, ws_port)
    }

    /// Chain's data directory: `base_path/id`.
    pub fn chain_db_path(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    /// Verifies `base_path` and `snapshot_base_path` exist and are
    /// writable, creating them if missing. Called once at startup;
    /// failure here is a fatal condition (`spec.md` §7).
    pub fn ensure_paths(&self) -> Result<()> {
        for dir in [&self.base_path, &self.snapshot_base_path, &self.snapshot_db_path] {
            std::fs::create_dir_all(dir).map_err(|source| Error::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
