//! The directory client interface used by the topology engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::Filter;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Only the base entry.
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and everything below it.
    Subtree,
}

/// Modify operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    /// Add values; fails if any value is already present.
    Add,
    /// Delete values, or the whole attribute when no values are given.
    Delete,
    /// Replace all values.
    Replace,
}

/// One change within a modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Operation code.
    pub op: ModOp,
    /// Attribute being changed.
    pub attr: String,
    /// Values the operation applies to.
    pub values: Vec<String>,
}

impl Modification {
    fn new<I, S>(op: ModOp, attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            attr: attr.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Add values to `attr`.
    pub fn add<I, S>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Add, attr, values)
    }

    /// Delete values from `attr` (all values when empty).
    pub fn delete<I, S>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Delete, attr, values)
    }

    /// Replace the values of `attr`.
    pub fn replace<I, S>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Replace, attr, values)
    }
}

/// Request/response operations against one directory node.
///
/// Searches never fail because the base entry is missing: they return an
/// empty result. Hard errors are reserved for genuine protocol failures.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Authenticate. The root DN binds anonymously.
    async fn bind(&self, dn: &Dn, password: &str) -> Result<()>;

    /// Search below `base`. An empty `attrs` selection returns all attributes.
    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<Entry>>;

    /// Add a new entry.
    async fn add(&self, entry: &Entry) -> Result<()>;

    /// Apply modifications to an existing entry, atomically.
    async fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<()>;

    /// Read a single entry by DN, if it exists and matches `filter`.
    async fn get_entry(&self, dn: &Dn, filter: &Filter, attrs: &[&str]) -> Result<Option<Entry>> {
        Ok(self
            .search(dn, Scope::Base, filter, attrs)
            .await?
            .into_iter()
            .next())
    }

    /// First entry matching a scoped search, if any.
    async fn find_one(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Option<Entry>> {
        Ok(self
            .search(base, scope, filter, attrs)
            .await?
            .into_iter()
            .next())
    }
}
