//! One-call replica provisioning: suffix, changelog, bind identity, replica.

use dirtopo_directory::Dn;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::replica::{register_replica, ReplicaExtras, ReplicaIdAllocator, ReplicaRegistration, ReplicaSpec};
use crate::server_config::{
    enable_repl_logging, ensure_bind_dn, setup_changelog, DEFAULT_REPL_BIND_CN, DEFAULT_REPL_BIND_DN,
};
use crate::suffix::{ensure_suffix, SuffixSetup};
use crate::topology::{DirectoryNode, ReplicaId, ReplicaRole};

/// Everything needed to turn a node into a replica of one suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetup {
    /// Suffix to replicate.
    pub suffix: Dn,
    /// Role of the node.
    #[serde(default = "default_role")]
    pub role: ReplicaRole,
    /// Identity suppliers bind as.
    #[serde(default = "default_bind_dn")]
    pub bind_dn: String,
    /// `cn` of that identity.
    #[serde(default = "default_bind_cn")]
    pub bind_cn: String,
    /// Its password.
    #[serde(default)]
    pub bind_password: String,
    /// Explicit replica ID.
    #[serde(default)]
    pub id: Option<ReplicaId>,
    /// Accept legacy suppliers.
    #[serde(default)]
    pub legacy: bool,
    /// Changelog directory; next to the database when unset.
    #[serde(default)]
    pub changelog_dir: Option<String>,
    /// Turn on replication logging.
    #[serde(default)]
    pub log: bool,
    /// Optional replica tuning.
    #[serde(default)]
    pub extras: ReplicaExtras,
}

fn default_role() -> ReplicaRole {
    ReplicaRole::Master
}

fn default_bind_dn() -> String {
    DEFAULT_REPL_BIND_DN.to_string()
}

fn default_bind_cn() -> String {
    DEFAULT_REPL_BIND_CN.to_string()
}

impl ReplicaSetup {
    /// Setup with default identity and no extras.
    pub fn new(suffix: Dn, role: ReplicaRole) -> Self {
        Self {
            suffix,
            role,
            bind_dn: default_bind_dn(),
            bind_cn: default_bind_cn(),
            bind_password: String::new(),
            id: None,
            legacy: false,
            changelog_dir: None,
            log: false,
            extras: ReplicaExtras::default(),
        }
    }

    /// The registration parameters this setup implies.
    pub fn replica_spec(&self) -> ReplicaSpec {
        ReplicaSpec {
            suffix: self.suffix.clone(),
            role: self.role,
            bind_dns: vec![self.bind_dn.clone()],
            id: self.id,
            legacy: self.legacy,
            extras: self.extras.clone(),
        }
    }
}

/// What [`replica_setup_all`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetupReport {
    /// Suffix and backend.
    pub suffix: SuffixSetup,
    /// Changelog directory, for suppliers.
    pub changelog: Option<String>,
    /// The replica.
    pub replica: ReplicaRegistration,
}

/// Provision `node` as a replica per `setup`.
///
/// Leaves get no changelog. Every step tolerates existing configuration.
pub async fn replica_setup_all(
    node: &DirectoryNode,
    setup: &ReplicaSetup,
    ids: &ReplicaIdAllocator,
) -> Result<ReplicaSetupReport> {
    let suffix = ensure_suffix(node, &setup.suffix, None).await?;
    if setup.log {
        enable_repl_logging(node).await?;
    }
    let changelog = if setup.role.is_supplier() {
        Some(setup_changelog(node, setup.changelog_dir.as_deref()).await?)
    } else {
        None
    };
    let bind_dn = Dn::parse(&setup.bind_dn)?;
    ensure_bind_dn(node, &bind_dn, &setup.bind_cn, &setup.bind_password).await?;
    let replica = register_replica(node, &setup.replica_spec(), ids).await?;

    info!(
        node = %node.info(),
        suffix = %setup.suffix,
        role = %setup.role,
        backend = %suffix.backend.name,
        id = replica.id,
        "replica provisioned"
    );
    Ok(ReplicaSetupReport {
        suffix,
        changelog,
        replica,
    })
}
