//! Resource Allocator: unused chain ids, TCP ports and data directories.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use rand::Rng;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::registry::ChainRegistry;

/// Generates unused chain identifiers, and allocates/probes TCP ports and
/// data directories. Allocation is advisory: a race between a probe and
/// the EVM's own `bind` is possible and is the Adapter's `start`
/// responsibility to surface (`spec.md` §4.1).
#[derive(Debug, Clone)]
pub struct ResourceAllocator {
    config: Arc<ManagerConfig>,
    registry: ChainRegistry,
}

impl ResourceAllocator {
    pub fn new(config: Arc<ManagerConfig>, registry: ChainRegistry) -> Self {
        Self { config, registry }
    }

    /// Generates a 64-bit random integer rendered as a decimal string,
    /// retrying until it is absent from both the registry and the
    /// filesystem.
    pub fn new_id(&self) -> String {
        loop {
            let candidate = rand::thread_rng().gen::<u64>().to_string();
            if !self.registry.contains(&candidate) && !self.path_in_use(&candidate) {
                return candidate;
            }
        }
    }

    /// `path_in_use` in `spec.md` terms operates on a `db_path`; this
    /// helper takes the bare chain id and checks `base_path/id`, which is
    /// what `new_id` needs before any `ChainConfig` exists.
    fn path_in_use(&self, id: &str) -> bool {
        self.config.chain_db_path(id).exists()
    }

    /// A path is in use if any live worker in the registry declares it as
    /// its `db_path`, or if nothing owns it but it already exists on disk
    /// (covers the `new_id` uniqueness check above).
    pub fn db_path_in_use(&self, path: &std::path::Path) -> bool {
        self.registry.path_in_use(path) || path.exists()
    }

    /// Probes whether a TCP port is free by attempting a non-blocking
    /// bind on `127.0.0.1`.
    pub fn port_in_use(&self, port: u16) -> bool {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        TcpListener::bind(addr).is_err()
    }

    /// Draws a free `(http, ws)` pair from the configured port range.
    /// Candidates already owned by a live worker, or unbindable, are
    /// rejected and retried.
    pub fn allocate_ports(&self) -> Result<(u16, u16)> {
        let range = self.config.port_range();
        for http in range.clone() {
            if self.registry.port_in_use(http) || self.port_in_use(http) {
                continue;
            }
            for ws in range.clone() {
                if ws == http {
                    continue;
                }
                if self.registry.port_in_use(ws) || self.port_in_use(ws) {
                    continue;
                }
                return Ok((http, ws));
            }
        }
        Err(Error::ResourceConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn allocator() -> ResourceAllocator {
        let mut config = ManagerConfig::default();
        config.evm_port_range = (18500, 18600);
        let dir = tempfile::tempdir().unwrap();
        config.base_path = dir.path().to_path_buf();
        std::mem::forget(dir);
        ResourceAllocator::new(Arc::new(config), ChainRegistry::new())
    }

    #[test]
    fn new_id_is_decimal_and_unique_ish() {
        let allocator = allocator();
        let a = allocator.new_id();
        let b = allocator.new_id();
        assert!(a.parse::<u64>().is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn allocate_ports_returns_distinct_free_ports() {
        let allocator = allocator();
        let (http, ws) = allocator.allocate_ports().unwrap();
        assert_ne!(http, ws);
        assert!(allocator.config.port_range().contains(&http));
    }

    #[test]
    fn allocate_ports_skips_ports_already_bound() {
        let allocator = allocator();
        let held = TcpListener::bind(("127.0.0.1", 18500)).unwrap();
        let (http, ws) = allocator.allocate_ports().unwrap();
        assert_ne!(http, 18500);
        assert_ne!(ws, 18500);
        drop(held);
    }
}
