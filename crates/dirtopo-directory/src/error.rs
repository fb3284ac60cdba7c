//! Error types for directory operations.

use thiserror::Error;

/// Errors returned by a directory client.
///
/// Absence of an entry during a search is not an error: searches return an
/// empty result instead. `NoSuchObject` is only raised by operations that
/// require the target to exist (modify, add below a missing parent).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The target entry (or the parent of an entry being added) does not exist.
    #[error("no such object: {dn}")]
    NoSuchObject {
        /// DN that could not be found.
        dn: String,
    },

    /// An entry with this DN already exists.
    #[error("entry already exists: {dn}")]
    AlreadyExists {
        /// DN of the existing entry.
        dn: String,
    },

    /// A value being added is already present on the attribute.
    #[error("value already exists for {attr} on {dn}")]
    TypeOrValueExists {
        /// DN of the modified entry.
        dn: String,
        /// Attribute holding the duplicate value.
        attr: String,
    },

    /// A value or attribute being deleted is not present.
    #[error("no such attribute {attr} on {dn}")]
    NoSuchAttribute {
        /// DN of the modified entry.
        dn: String,
        /// Attribute that was missing.
        attr: String,
    },

    /// The DN string could not be parsed.
    #[error("invalid DN {dn:?}: {reason}")]
    InvalidDn {
        /// The offending input.
        dn: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Bind failed.
    #[error("invalid credentials for {dn}")]
    InvalidCredentials {
        /// Bind identity that was rejected.
        dn: String,
    },

    /// The server could not be reached.
    #[error("server down: {addr}")]
    ServerDown {
        /// Address that was contacted.
        addr: String,
    },

    /// Any other operation failure reported by the server.
    #[error("protocol error: {msg}")]
    Protocol {
        /// Error message describing the failure.
        msg: String,
    },
}

impl DirectoryError {
    /// True for the "entry already exists" conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DirectoryError::AlreadyExists { .. })
    }

    /// True when a value being added was already present.
    pub fn is_type_or_value_exists(&self) -> bool {
        matches!(self, DirectoryError::TypeOrValueExists { .. })
    }

    /// True when the target entry does not exist.
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, DirectoryError::NoSuchObject { .. })
    }
}

/// Result alias for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;
