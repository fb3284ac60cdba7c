//! Server-wide settings: bind identities, the changelog, log levels and indexes.

use dirtopo_directory::{Dn, Entry, Filter, Modification};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, TopologyError};
use crate::layout;
use crate::suffix::backends_for_suffix;
use crate::topology::DirectoryNode;

/// Error log level that traces replication sessions.
pub const REPLICATION_LOG_LEVEL: u32 = 8192;

/// Default replication bind identity.
pub const DEFAULT_REPL_BIND_DN: &str = "cn=replication manager,cn=config";

/// Default `cn` of the replication bind identity.
pub const DEFAULT_REPL_BIND_CN: &str = "replication manager";

/// Create a person entry usable as a bind identity. Existing entries are kept.
pub async fn ensure_bind_dn(node: &DirectoryNode, dn: &Dn, cn: &str, password: &str) -> Result<bool> {
    let entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "person"])
        .with("cn", [cn])
        .with("userpassword", [password])
        .with("sn", ["bind dn pseudo user"]);
    match node.client().add(&entry).await {
        Ok(()) => {
            info!(dn = %dn, node = %node.info(), "created bind dn");
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            debug!(dn = %dn, "bind dn already exists");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Database directory of the server, read from the local database config.
pub async fn database_dir(node: &DirectoryNode) -> Result<Option<String>> {
    let entry = node
        .client()
        .get_entry(&layout::ldbm_config(), &Filter::everything(), &["nsslapd-directory"])
        .await?;
    Ok(entry.and_then(|e| {
        e.get("nsslapd-directory").map(|dir| {
            Path::new(dir)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }))
}

/// Enable the replication changelog.
///
/// Without `dir` the changelog goes to `<database dir>/cldb`. Returns the
/// directory in effect; an existing changelog entry is left as is.
pub async fn setup_changelog(node: &DirectoryNode, dir: Option<&str>) -> Result<String> {
    let dn = layout::changelog();
    if let Some(existing) = node
        .client()
        .get_entry(&dn, &Filter::everything(), &["nsslapd-changelogdir"])
        .await?
    {
        let dir = existing.get("nsslapd-changelogdir").unwrap_or_default().to_string();
        debug!(dir = %dir, node = %node.info(), "changelog already configured");
        return Ok(dir);
    }

    let dir = match dir {
        Some(dir) => dir.to_string(),
        None => match database_dir(node).await? {
            Some(base) if !base.is_empty() => format!("{}/cldb", base),
            _ => {
                return Err(TopologyError::InvalidArgument {
                    msg: format!("no changelog directory given and {} has no database directory", node.info()),
                })
            }
        },
    };

    let entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "extensibleobject"])
        .with("cn", ["changelog5"])
        .with("nsslapd-changelogdir", [dir.as_str()]);
    match node.client().add(&entry).await {
        Ok(()) => info!(dir = %dir, node = %node.info(), "changelog enabled"),
        Err(e) if e.is_already_exists() => debug!(dn = %dn, "changelog appeared concurrently"),
        Err(e) => return Err(e.into()),
    }
    Ok(dir)
}

/// Set `nsslapd-errorlog-level` to the sum of `levels`.
pub async fn set_error_log_level(node: &DirectoryNode, levels: &[u32]) -> Result<()> {
    let level: u32 = levels.iter().sum();
    node.client()
        .modify(
            &layout::config(),
            &[Modification::replace("nsslapd-errorlog-level", [level.to_string()])],
        )
        .await?;
    Ok(())
}

/// Set `nsslapd-accesslog-level` to the sum of `levels`.
pub async fn set_access_log_level(node: &DirectoryNode, levels: &[u32]) -> Result<()> {
    let level: u32 = levels.iter().sum();
    node.client()
        .modify(
            &layout::config(),
            &[Modification::replace("nsslapd-accesslog-level", [level.to_string()])],
        )
        .await?;
    Ok(())
}

/// Trace replication in the error log.
pub async fn enable_repl_logging(node: &DirectoryNode) -> Result<()> {
    set_error_log_level(node, &[REPLICATION_LOG_LEVEL]).await
}

/// Back to the default error log level.
pub async fn disable_repl_logging(node: &DirectoryNode) -> Result<()> {
    set_error_log_level(node, &[0]).await
}

async fn first_backend(node: &DirectoryNode, suffix: &Dn) -> Result<Dn> {
    backends_for_suffix(node, suffix)
        .await?
        .into_iter()
        .next()
        .map(|e| e.dn().clone())
        .ok_or_else(|| TopologyError::NotConfigured {
            what: "backend",
            dn: suffix.to_string(),
        })
}

/// Index `attr` on the first backend of `suffix`.
///
/// Returns false when the index already existed.
pub async fn add_index(
    node: &DirectoryNode,
    suffix: &Dn,
    attr: &str,
    index_types: &[&str],
    matching_rules: &[&str],
) -> Result<bool> {
    let container = first_backend(node, suffix).await?.child("cn=index");
    let holder = Entry::new(container.clone())
        .with("objectclass", ["top", "nsContainer"])
        .with("cn", ["index"]);
    match node.client().add(&holder).await {
        Ok(()) => {}
        Err(e) if e.is_already_exists() => {}
        Err(e) => return Err(e.into()),
    }

    let dn = container.child(format!("cn={}", attr));
    let entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "nsIndex"])
        .with("cn", [attr])
        .with("nsSystemIndex", ["false"])
        .with("nsIndexType", index_types.iter().copied())
        .with("nsMatchingRule", matching_rules.iter().copied());
    match node.client().add(&entry).await {
        Ok(()) => {
            info!(attr, suffix = %suffix, "index added");
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            info!(attr, dn = %dn, "index already exists");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Refuse unindexed searches on the first backend of `suffix`.
pub async fn require_index(node: &DirectoryNode, suffix: &Dn) -> Result<()> {
    let backend = first_backend(node, suffix).await?;
    node.client()
        .modify(&backend, &[Modification::replace("nsslapd-require-index", ["on"])])
        .await?;
    Ok(())
}
