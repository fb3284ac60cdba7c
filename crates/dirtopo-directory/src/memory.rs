//! In-process directory used for dry runs and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::{DirectoryClient, ModOp, Modification, Scope};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::filter::Filter;

/// Operation counts, for assertions in tests.
#[derive(Debug, Default)]
pub struct OpCounters {
    /// Searches served.
    pub searches: AtomicU64,
    /// Successful adds.
    pub adds: AtomicU64,
    /// Successful modifies.
    pub modifies: AtomicU64,
}

/// A directory held entirely in memory.
///
/// Adds require the parent entry to exist (single-RDN entries hang off the
/// implicit root). Modifies are atomic per request.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<Dn, Entry>>,
    credentials: RwLock<HashMap<Dn, String>>,
    counters: OpCounters,
}

impl MemoryDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory pre-populated with the configuration containers a freshly
    /// created server instance exposes.
    pub fn with_server_config(instance: &str) -> Self {
        let config = Dn::from_rdns(["cn=config"]);
        let plugins = config.child("cn=plugins");
        let ldbm = plugins.child("cn=ldbm database");
        let chaining = plugins.child("cn=chaining database");
        let tasks = config.child("cn=tasks");

        let container = |dn: &Dn, cn: &str| {
            Entry::new(dn.clone())
                .with("objectclass", ["top", "extensibleObject"])
                .with("cn", [cn])
        };

        let seed = vec![
            container(&config, "config")
                .with("nsslapd-errorlog-level", ["0"])
                .with("nsslapd-accesslog-level", ["256"])
                .with(
                    "nsslapd-errorlog",
                    [format!("/var/log/dirsrv/slapd-{}/errors", instance)],
                ),
            container(&plugins, "plugins"),
            container(&ldbm, "ldbm database"),
            container(&ldbm.child("cn=config"), "config").with(
                "nsslapd-directory",
                [format!("/var/lib/dirsrv/slapd-{}/db", instance)],
            ),
            container(&chaining, "chaining database"),
            container(&chaining.child("cn=config"), "config"),
            container(
                &plugins.child("cn=multimaster replication plugin"),
                "Multimaster Replication Plugin",
            )
            .with("nsslapd-pluginPath", ["libreplication-plugin"]),
            container(&config.child("cn=mapping tree"), "mapping tree"),
            container(&tasks, "tasks"),
            container(&tasks.child("cn=import"), "import"),
            container(&tasks.child("cn=export"), "export"),
        ];

        let entries = seed
            .into_iter()
            .map(|e| (e.dn().clone(), e))
            .collect::<BTreeMap<_, _>>();

        Self {
            entries: RwLock::new(entries),
            ..Self::default()
        }
    }

    /// Register a bind identity that has no entry of its own (e.g. the root DN).
    pub async fn set_credentials(&self, dn: Dn, password: &str) {
        self.credentials.write().await.insert(dn, password.to_string());
    }

    /// Insert or overwrite an entry without parent checks.
    pub async fn insert(&self, entry: Entry) {
        self.entries
            .write()
            .await
            .insert(entry.dn().clone(), entry);
    }

    /// Remove an entry, returning it.
    pub async fn remove(&self, dn: &Dn) -> Option<Entry> {
        self.entries.write().await.remove(dn)
    }

    /// Current copy of an entry.
    pub async fn entry(&self, dn: &Dn) -> Option<Entry> {
        self.entries.read().await.get(dn).cloned()
    }

    /// Number of entries held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no entries are held.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All entries, parents before children.
    pub async fn entries(&self) -> Vec<Entry> {
        let mut all: Vec<Entry> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.dn().rdns().iter().rev().cloned().collect::<Vec<_>>());
        all
    }

    /// Operation counters.
    pub fn counters(&self) -> &OpCounters {
        &self.counters
    }
}

fn in_scope(dn: &Dn, base: &Dn, scope: Scope) -> bool {
    match scope {
        Scope::Base => dn == base,
        Scope::OneLevel => dn.is_child_of(base),
        Scope::Subtree => dn == base || dn.is_descendant_of(base),
    }
}

fn apply_modification(entry: &mut Entry, m: &Modification) -> Result<()> {
    let dn = entry.dn().to_string();
    match m.op {
        ModOp::Add => {
            if m.values.iter().any(|v| entry.has_value(&m.attr, v)) {
                return Err(DirectoryError::TypeOrValueExists {
                    dn,
                    attr: m.attr.clone(),
                });
            }
            entry.add_values(&m.attr, m.values.iter().cloned());
        }
        ModOp::Delete => {
            if !entry.contains(&m.attr) {
                return Err(DirectoryError::NoSuchAttribute {
                    dn,
                    attr: m.attr.clone(),
                });
            }
            if m.values.is_empty() {
                entry.remove(&m.attr);
            } else if entry.remove_values(&m.attr, &m.values) == 0 {
                return Err(DirectoryError::NoSuchAttribute {
                    dn,
                    attr: m.attr.clone(),
                });
            }
        }
        ModOp::Replace => entry.set(&m.attr, m.values.iter().cloned()),
    }
    Ok(())
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn bind(&self, dn: &Dn, password: &str) -> Result<()> {
        if dn.is_root() {
            return Ok(());
        }
        if let Some(stored) = self.credentials.read().await.get(dn) {
            if stored == password {
                return Ok(());
            }
        }
        let entries = self.entries.read().await;
        match entries.get(dn) {
            Some(entry) if entry.get_all("userpassword").iter().any(|p| p == password) => Ok(()),
            _ => Err(DirectoryError::InvalidCredentials { dn: dn.to_string() }),
        }
    }

    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<Entry>> {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.read().await;
        if !base.is_root() && !entries.contains_key(base) {
            debug!(base = %base, "search base not found");
            return Ok(Vec::new());
        }
        Ok(entries
            .values()
            .filter(|e| in_scope(e.dn(), base, scope) && filter.matches(e))
            .map(|e| e.project(attrs))
            .collect())
    }

    async fn add(&self, entry: &Entry) -> Result<()> {
        let dn = entry.dn();
        if dn.is_root() {
            return Err(DirectoryError::Protocol {
                msg: "cannot add the root DN".to_string(),
            });
        }
        let mut entries = self.entries.write().await;
        if entries.contains_key(dn) {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        if let Some(parent) = dn.parent() {
            if !parent.is_root() && !entries.contains_key(&parent) {
                return Err(DirectoryError::NoSuchObject {
                    dn: parent.to_string(),
                });
            }
        }
        entries.insert(dn.clone(), entry.clone());
        self.counters.adds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<()> {
        let mut entries = self.entries.write().await;
        let current = entries
            .get(dn)
            .ok_or_else(|| DirectoryError::NoSuchObject { dn: dn.to_string() })?;
        let mut updated = current.clone();
        for m in mods {
            apply_modification(&mut updated, m)?;
        }
        entries.insert(dn.clone(), updated);
        self.counters.modifies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
