#![warn(missing_docs)]

//! dirtopo directory subsystem: DN handling, entries, filters, the directory
//! client interface and an in-memory directory.

pub mod client;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod memory;

pub use client::{DirectoryClient, ModOp, Modification, Scope};
pub use dn::{normalize_dn, Dn};
pub use entry::{Attribute, Entry};
pub use error::{DirectoryError, Result};
pub use filter::Filter;
pub use memory::MemoryDirectory;
