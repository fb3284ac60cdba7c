//! Error types for the topology engine.

use dirtopo_directory::DirectoryError;
use thiserror::Error;

/// Errors that abort a topology operation.
///
/// Timeouts and exhausted busy-retries are not errors; they are reported
/// through the outcome types of the operations that wait.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Directory protocol failure, always propagated.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// An agreement endpoint has no replica registered for the suffix.
    #[error("node {node} has no replica for suffix {suffix}")]
    MissingReplica {
        /// Node address (host:port).
        node: String,
        /// Normalized suffix.
        suffix: String,
    },

    /// A configuration entry the operation depends on is absent.
    #[error("{what} not configured: {dn}")]
    NotConfigured {
        /// What was expected.
        what: &'static str,
        /// Where it was expected.
        dn: String,
    },

    /// An attribute held a value that could not be interpreted.
    #[error("malformed {attr} on {dn}: {value:?}")]
    MalformedAttribute {
        /// Entry holding the value.
        dn: String,
        /// Attribute name.
        attr: String,
        /// The raw value.
        value: String,
    },

    /// Caller supplied parameters that cannot work.
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// Error message describing the problem.
        msg: String,
    },
}

/// Result alias for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;
