//! Lifecycle manager for local Ethereum test chains (Geth/Ganache) run as
//! supervised child processes: identity and resource allocation, process
//! supervision, snapshot lifecycle, and a publish/subscribe notification
//! protocol. See [`ChainFacade`] for the public entry point.

pub mod accounts;
pub mod adapter;
pub mod allocator;
pub mod bus;
pub mod config;
pub mod error;
pub mod facade;
pub mod registry;
pub mod rpc;
pub mod snapshot;
pub mod supervisor;
pub mod types;
pub mod worker;

pub use bus::{ChainEvent, NotificationBus, Subscription, Topic};
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use facade::{read_external_data, write_external_data, ChainFacade};
pub use types::{Account, ChainConfig, ChainHandle, ChainStatus, ChainType, SnapshotDetails};
