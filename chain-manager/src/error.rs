//! Error kinds returned by the Chain Manager's public API.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the core. Variants line up with the six error kinds
/// the Chain Manager distinguishes: validation, resource conflicts, start
/// failures, runtime crashes, snapshot failures and rejected commands.
#[derive(Debug, Error)]
pub enum Error {
    /// A `ChainConfig` failed validation before any resources were touched.
    #[error("invalid chain config: {0}")]
    Validation(String),

    /// A requested port or data directory is already in use.
    #[error("port or path are in use")]
    ResourceConflict,

    /// The EVM process exited, or the readiness probe never succeeded
    /// within `kill_timeout`.
    #[error("EVM failed to start within the kill timeout: {0}")]
    StartFailure(String),

    /// The EVM process exited unexpectedly while the chain was live.
    #[error("EVM process crashed: {0}")]
    RuntimeCrash(String),

    /// A snapshot take/restore operation failed.
    #[error("snapshot operation failed: {0}")]
    SnapshotFailure(String),

    /// The command was rejected because the chain is not in a state that
    /// accepts it (e.g. a command arrived mid-snapshot).
    #[error("busy")]
    Busy,

    /// No chain with this id is currently registered.
    #[error("unknown chain id: {0}")]
    UnknownChain(String),

    /// The requested operation is not supported by this EVM adapter.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// A condition severe enough that the process should abort rather than
    /// continue operating (corrupt snapshot index, unwritable base path).
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Wraps a lower-level I/O failure with the path that triggered it.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the failing operation concerned.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Maps the error to the exit codes documented for CLI wrappers built
    /// atop the core (0 success is not represented here; callers only
    /// reach this mapping once an `Error` exists).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 64,
            Error::ResourceConflict => 65,
            Error::StartFailure(_) => 66,
            Error::RuntimeCrash(_)
            | Error::SnapshotFailure(_)
            | Error::Busy
            | Error::UnknownChain(_)
            | Error::Unsupported(_)
            | Error::Fatal(_)
            | Error::Io { .. } => 70,
        }
    }
}

/// Shorthand used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
