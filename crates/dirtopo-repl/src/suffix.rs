//! Backends and mapping-tree entries: where a suffix is stored and how it
//! hangs off its parent suffix.

use dirtopo_directory::{Dn, Entry, Filter, Scope};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TopologyError};
use crate::layout;
use crate::topology::DirectoryNode;

/// Credentials and upstream servers of a chaining backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainingTarget {
    /// Identity the chaining backend binds as on the farm servers.
    pub bind_dn: String,
    /// Password for `bind_dn`.
    pub bind_password: String,
    /// `ldap://host:port/` URLs of the farm servers.
    pub farm_urls: Vec<String>,
}

impl ChainingTarget {
    fn is_usable(&self) -> bool {
        !self.bind_dn.is_empty() && !self.farm_urls.is_empty()
    }
}

/// Storage flavour of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local database (`localdb<n>`).
    Local,
    /// Chaining backend forwarding to a farm (`chaindb<n>`).
    Chaining,
}

impl BackendKind {
    /// Prefix of generated backend names.
    pub fn prefix(self) -> &'static str {
        match self {
            BackendKind::Local => "localdb",
            BackendKind::Chaining => "chaindb",
        }
    }

    /// Container the backend entry lives under.
    pub fn container(self) -> Dn {
        match self {
            BackendKind::Local => layout::ldbm_database(),
            BackendKind::Chaining => layout::chaining_database(),
        }
    }
}

/// A backend serving a suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Backend name (the `cn`).
    pub name: String,
    /// Location of the backend entry.
    pub dn: Dn,
    /// True when this call created it.
    pub created: bool,
}

/// What [`ensure_suffix`] found or built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixSetup {
    /// The normalized suffix.
    pub suffix: Dn,
    /// Backend serving it.
    pub backend: Backend,
    /// Closest ancestor suffix with a mapping-tree entry.
    pub parent: Option<Dn>,
    /// Location of the mapping-tree entry.
    pub mapping_tree: Dn,
    /// True when the mapping-tree entry was created by this call.
    pub created: bool,
}

fn backend_filter(extra: Filter) -> Filter {
    Filter::and([Filter::equal("objectclass", "nsBackendInstance"), extra])
}

/// Backend entries whose `nsslapd-suffix` names `suffix`.
pub async fn backends_for_suffix(node: &DirectoryNode, suffix: &Dn) -> Result<Vec<Entry>> {
    let filter = backend_filter(Filter::equal("nsslapd-suffix", suffix.to_string()));
    Ok(node
        .client()
        .search(&layout::plugins(), Scope::Subtree, &filter, &["cn", "nsslapd-suffix"])
        .await?)
}

/// Suffix served by the backend named `backend`, if that backend exists.
pub async fn suffix_for_backend(node: &DirectoryNode, backend: &str) -> Result<Option<Dn>> {
    let filter = backend_filter(Filter::equal("cn", backend));
    let found = node
        .client()
        .find_one(&layout::plugins(), Scope::Subtree, &filter, &["nsslapd-suffix"])
        .await?;
    match found.as_ref().and_then(|e| e.get("nsslapd-suffix")) {
        Some(raw) => Ok(Some(Dn::parse(raw)?)),
        None => Ok(None),
    }
}

fn next_backend_seq(suffix: &Dn, seq: u32) -> Result<u32> {
    seq.checked_add(1).ok_or_else(|| TopologyError::InvalidArgument {
        msg: format!("no free backend name left for {}", suffix),
    })
}

/// Create a new backend for `suffix`.
///
/// A chaining backend is created when `chaining` carries a bind DN and at
/// least one farm URL. Name collisions move on to the next sequence number.
pub async fn create_backend(
    node: &DirectoryNode,
    suffix: &Dn,
    chaining: Option<&ChainingTarget>,
    extras: &[(&str, &str)],
) -> Result<Backend> {
    let chaining = chaining.filter(|c| c.is_usable());
    let kind = if chaining.is_some() {
        BackendKind::Chaining
    } else {
        BackendKind::Local
    };
    let container = kind.container();

    let mut seq = 1u32;
    loop {
        let name = format!("{}{}", kind.prefix(), seq);
        let dn = container.child(format!("cn={}", name));
        let mut entry = Entry::new(dn.clone())
            .with("objectclass", ["top", "extensibleObject", "nsBackendInstance"])
            .with("cn", [name.as_str()])
            .with("nsslapd-suffix", [suffix.to_string()]);
        if let Some(target) = chaining {
            entry = entry
                .with("nsfarmserverurl", [target.farm_urls.join(" ")])
                .with("nsmultiplexorbinddn", [target.bind_dn.as_str()])
                .with("nsmultiplexorcredentials", [target.bind_password.as_str()]);
        }
        for (attr, value) in extras {
            entry.add_values(attr, [*value]);
        }

        match node.client().add(&entry).await {
            Ok(()) => {
                info!(suffix = %suffix, backend = %name, node = %node.info(), "created backend");
                return Ok(Backend {
                    name,
                    dn,
                    created: true,
                });
            }
            Err(e) if e.is_already_exists() => {
                debug!(backend = %name, "backend name taken, trying next");
                seq = next_backend_seq(suffix, seq)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Mapping-tree entry for `suffix`, if one exists.
///
/// Matches both the quoted and the bare `cn` spelling.
pub async fn mapping_tree_entry(node: &DirectoryNode, suffix: &Dn) -> Result<Option<Entry>> {
    let filter = Filter::or([
        Filter::equal("cn", layout::quoted(suffix)),
        Filter::equal("cn", suffix.to_string()),
    ]);
    Ok(node
        .client()
        .find_one(&layout::mapping_tree(), Scope::OneLevel, &filter, &[])
        .await?)
}

/// Nearest ancestor of `suffix` that has a mapping-tree entry.
pub async fn find_parent_suffix(node: &DirectoryNode, suffix: &Dn) -> Result<Option<Dn>> {
    for ancestor in suffix.ancestors() {
        if mapping_tree_entry(node, &ancestor).await?.is_some() {
            return Ok(Some(ancestor));
        }
    }
    Ok(None)
}

/// Create the mapping-tree entry binding `suffix` to `backend`.
///
/// Returns the entry location and whether it was created; an existing entry
/// is left untouched.
pub async fn setup_suffix_entry(
    node: &DirectoryNode,
    suffix: &Dn,
    backend: &str,
    parent: Option<&Dn>,
) -> Result<(Dn, bool)> {
    if let Some(existing) = mapping_tree_entry(node, suffix).await? {
        return Ok((existing.dn().clone(), false));
    }

    let dn = layout::mapping_tree_entry(suffix);
    let mut entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "extensibleObject", "nsMappingTree"])
        .with("cn", [layout::quoted(suffix)])
        .with("nsslapd-state", ["backend"])
        .with("nsslapd-backend", [backend]);
    if let Some(parent) = parent {
        entry.set("nsslapd-parent-suffix", [layout::quoted(parent)]);
    }

    match node.client().add(&entry).await {
        Ok(()) => {
            info!(suffix = %suffix, backend, parent = ?parent.map(|p| p.to_string()), "created mapping tree entry");
            Ok((dn, true))
        }
        Err(e) if e.is_already_exists() => Ok((dn, false)),
        Err(e) => Err(e.into()),
    }
}

/// Make `suffix` exist on `node`: backend, parent resolution, mapping tree.
///
/// The first backend already serving `suffix` is reused. Safe to repeat; a
/// second call reports the same backend and creates nothing.
pub async fn ensure_suffix(
    node: &DirectoryNode,
    suffix: &Dn,
    chaining: Option<&ChainingTarget>,
) -> Result<SuffixSetup> {
    let backend = match backends_for_suffix(node, suffix).await?.into_iter().next() {
        Some(existing) => {
            let name = existing.get("cn").unwrap_or_default().to_string();
            debug!(suffix = %suffix, backend = %name, node = %node.info(), "reusing backend");
            Backend {
                name,
                dn: existing.dn().clone(),
                created: false,
            }
        }
        None => create_backend(node, suffix, chaining, &[]).await?,
    };
    let parent = find_parent_suffix(node, suffix).await?;
    let (mapping_tree, created) =
        setup_suffix_entry(node, suffix, &backend.name, parent.as_ref()).await?;
    Ok(SuffixSetup {
        suffix: suffix.clone(),
        backend,
        parent,
        mapping_tree,
        created,
    })
}
