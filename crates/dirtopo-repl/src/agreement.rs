//! Replication agreements: directed supplier → consumer links for a suffix.

use dirtopo_directory::{Dn, Entry, Filter, Modification, Scope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chaining::{setup_chaining_farm, setup_consumer_chain_on_update};
use crate::error::{Result, TopologyError};
use crate::layout;
use crate::poll::{wait_for_entry, PollConfig, WaitOutcome};
use crate::server_config::DEFAULT_REPL_BIND_DN;
use crate::suffix::ChainingTarget;
use crate::topology::{DirectoryNode, NodeInfo, ReplicaRecord, ReplicaRole};

/// Update schedule of an enabled agreement: all day, every day.
pub const SCHEDULE_ALWAYS: &str = "0000-2359 0123456";

/// Update schedule of a paused agreement: one minute on Sundays.
pub const SCHEDULE_PAUSED: &str = "2358-2359 0";

/// Windows synchronization settings of an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinSyncOptions {
    /// Windows subtree; `cn=users,<suffix>` when unset.
    pub windows_subtree: Option<String>,
    /// Directory subtree; `ou=People,<suffix>` when unset.
    pub directory_subtree: Option<String>,
    /// Create directory users for new Windows users.
    pub new_win_users: bool,
    /// Create directory groups for new Windows groups.
    pub new_win_groups: bool,
    /// Windows domain; derived from the suffix's RDN values when unset.
    pub windows_domain: Option<String>,
}

impl Default for WinSyncOptions {
    fn default() -> Self {
        Self {
            windows_subtree: None,
            directory_subtree: None,
            new_win_users: true,
            new_win_groups: true,
            windows_domain: None,
        }
    }
}

/// Parameters of [`establish_agreement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementOptions {
    /// Identity the supplier binds as on the consumer.
    pub bind_dn: String,
    /// Password for `bind_dn`.
    pub bind_password: String,
    /// Replication session timeout in seconds.
    pub timeout_secs: u64,
    /// Fractional replication attribute list, written verbatim.
    pub fractional: Option<String>,
    /// Start a total update as soon as the agreement exists.
    pub auto_init: bool,
    /// Forward writes from a read-only consumer back to the supplier.
    pub chain: bool,
    /// Windows synchronization instead of plain replication.
    pub win_sync: Option<WinSyncOptions>,
}

impl Default for AgreementOptions {
    fn default() -> Self {
        Self {
            bind_dn: DEFAULT_REPL_BIND_DN.to_string(),
            bind_password: String::new(),
            timeout_secs: 120,
            fractional: None,
            auto_init: false,
            chain: false,
            win_sync: None,
        }
    }
}

/// How [`establish_agreement`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgreementOutcome {
    /// Created and readable.
    Created(Dn),
    /// Already present; nothing was written.
    Existing(Dn),
    /// Created but never became readable within the deadline.
    TimedOut {
        /// Agreement location.
        dn: Dn,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// Created, then the wait was cancelled.
    Cancelled {
        /// Agreement location.
        dn: Dn,
    },
}

impl AgreementOutcome {
    /// Location of the agreement entry.
    pub fn dn(&self) -> &Dn {
        match self {
            AgreementOutcome::Created(dn) | AgreementOutcome::Existing(dn) => dn,
            AgreementOutcome::TimedOut { dn, .. } | AgreementOutcome::Cancelled { dn } => dn,
        }
    }

    /// True when the agreement is known to be in place.
    pub fn is_established(&self) -> bool {
        matches!(self, AgreementOutcome::Created(_) | AgreementOutcome::Existing(_))
    }
}

/// Deterministic agreement name for `consumer` and `suffix`.
///
/// `meTo<host><port>-<digest>`, where the port is the consumer's effective
/// port and the digest is the first 8 hex digits of SHA-256 over the
/// normalized suffix.
pub fn agreement_name(consumer: &NodeInfo, suffix: &Dn) -> String {
    let digest = Sha256::digest(suffix.to_string().as_bytes());
    let short = hex::encode(&digest[..4]);
    format!("meTo{}{}-{}", consumer.host, consumer.effective_port(), short)
}

async fn require_replica(node: &DirectoryNode, suffix: &Dn) -> Result<ReplicaRecord> {
    node.replica(suffix)
        .await
        .ok_or_else(|| TopologyError::MissingReplica {
            node: node.info().to_string(),
            suffix: suffix.to_string(),
        })
}

fn win_sync_attributes(entry: &mut Entry, suffix: &Dn, opts: &WinSyncOptions) {
    entry.add_values("objectclass", ["nsDSWindowsReplicationAgreement"]);
    let windows_subtree = opts
        .windows_subtree
        .clone()
        .unwrap_or_else(|| format!("cn=users,{}", suffix));
    let directory_subtree = opts
        .directory_subtree
        .clone()
        .unwrap_or_else(|| format!("ou=People,{}", suffix));
    let domain = opts
        .windows_domain
        .clone()
        .unwrap_or_else(|| suffix.rdn_values().join("."));
    entry.set("nsds7WindowsReplicaSubtree", [windows_subtree]);
    entry.set("nsds7DirectoryReplicaSubtree", [directory_subtree]);
    entry.set("nsds7NewWinUserSyncEnabled", [opts.new_win_users.to_string()]);
    entry.set("nsds7NewWinGroupSyncEnabled", [opts.new_win_groups.to_string()]);
    entry.set("nsds7WindowsDomain", [domain]);
}

fn agreement_entry(dn: &Dn, name: &str, consumer: &NodeInfo, suffix: &Dn, opts: &AgreementOptions) -> Entry {
    let port = consumer.effective_port();
    let mut entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "nsds5replicationagreement"])
        .with("cn", [name])
        .with("nsds5replicahost", [consumer.host.as_str()])
        .with("nsds5replicaport", [port.to_string()])
        .with("nsds5replicatimeout", [opts.timeout_secs.to_string()])
        .with("nsds5replicabinddn", [opts.bind_dn.as_str()])
        .with("nsds5replicacredentials", [opts.bind_password.as_str()])
        .with("nsds5replicabindmethod", ["simple"])
        .with("nsds5replicaroot", [suffix.to_string()])
        .with("nsds5replicaupdateschedule", [SCHEDULE_ALWAYS])
        .with("description", [format!("me to {}{}", consumer.host, port)]);
    if consumer.secure_port.is_some() {
        entry.set("nsds5replicatransportinfo", ["SSL"]);
    }
    if let Some(fractional) = &opts.fractional {
        entry.set("nsDS5ReplicatedAttributeList", [fractional.as_str()]);
    }
    if opts.auto_init {
        entry.set("nsds5BeginReplicaRefresh", ["start"]);
    }
    if let Some(win_sync) = &opts.win_sync {
        win_sync_attributes(&mut entry, suffix, win_sync);
    }
    entry
}

/// Create the agreement from `supplier` to `consumer` for `suffix`.
///
/// Both nodes need a registered replica for the suffix. A second call for
/// the same pair and suffix returns [`AgreementOutcome::Existing`] with the
/// same location. After creation the call waits until the entry is readable.
/// When `opts.chain` is set, chaining is (re)applied for new and existing
/// agreements alike, so a retry finishes an interrupted setup.
pub async fn establish_agreement(
    supplier: &DirectoryNode,
    consumer: &DirectoryNode,
    suffix: &Dn,
    opts: &AgreementOptions,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<AgreementOutcome> {
    let supplier_replica = require_replica(supplier, suffix).await?;
    let consumer_replica = require_replica(consumer, suffix).await?;

    let name = agreement_name(consumer.info(), suffix);
    let dn = supplier_replica.dn.child(format!("cn={}", name));
    let filter = Filter::equal("objectclass", "nsds5replicationagreement");

    if supplier.client().get_entry(&dn, &filter, &["cn"]).await?.is_some() {
        debug!(dn = %dn, "agreement already exists");
        supplier.record_agreement(consumer.info(), suffix.clone(), dn.clone()).await;
        if opts.chain {
            chain_agreement(supplier, &supplier_replica, consumer, &consumer_replica, suffix, opts).await?;
        }
        return Ok(AgreementOutcome::Existing(dn));
    }

    let entry = agreement_entry(&dn, &name, consumer.info(), suffix, opts);
    match supplier.client().add(&entry).await {
        Ok(()) => {}
        Err(e) if e.is_already_exists() => {
            debug!(dn = %dn, "agreement created concurrently");
            supplier.record_agreement(consumer.info(), suffix.clone(), dn.clone()).await;
            if opts.chain {
                chain_agreement(supplier, &supplier_replica, consumer, &consumer_replica, suffix, opts)
                    .await?;
            }
            return Ok(AgreementOutcome::Existing(dn));
        }
        Err(e) => return Err(e.into()),
    }

    match wait_for_entry(supplier, &dn, poll, cancel).await? {
        WaitOutcome::Ready(_) => {}
        WaitOutcome::TimedOut { elapsed } => {
            warn!(dn = %dn, node = %supplier.info(), ?elapsed, "agreement added but not readable");
            return Ok(AgreementOutcome::TimedOut { dn, elapsed });
        }
        WaitOutcome::Cancelled => return Ok(AgreementOutcome::Cancelled { dn }),
    }
    supplier.record_agreement(consumer.info(), suffix.clone(), dn.clone()).await;
    info!(dn = %dn, supplier = %supplier.info(), consumer = %consumer.info(), suffix = %suffix, "agreement created");

    if opts.chain {
        chain_agreement(supplier, &supplier_replica, consumer, &consumer_replica, suffix, opts).await?;
    }

    Ok(AgreementOutcome::Created(dn))
}

async fn chain_agreement(
    supplier: &DirectoryNode,
    supplier_replica: &ReplicaRecord,
    consumer: &DirectoryNode,
    consumer_replica: &ReplicaRecord,
    suffix: &Dn,
    opts: &AgreementOptions,
) -> Result<()> {
    if supplier_replica.role == ReplicaRole::Master {
        let bind_dn = Dn::parse(&opts.bind_dn)?;
        setup_chaining_farm(supplier, suffix, &bind_dn, &opts.bind_password).await?;
    }
    if consumer_replica.role != ReplicaRole::Master {
        let target = ChainingTarget {
            bind_dn: opts.bind_dn.clone(),
            bind_password: opts.bind_password.clone(),
            farm_urls: vec![supplier.info().ldap_url()],
        };
        let intermediate = consumer_replica.role == ReplicaRole::Hub;
        setup_consumer_chain_on_update(consumer, suffix, intermediate, &target).await?;
    }
    Ok(())
}

/// Enable or pause an agreement by rewriting its update schedule.
pub async fn toggle_schedule(node: &DirectoryNode, agreement: &Dn, enabled: bool) -> Result<()> {
    let schedule = if enabled { SCHEDULE_ALWAYS } else { SCHEDULE_PAUSED };
    node.client()
        .modify(
            agreement,
            &[Modification::replace("nsds5replicaupdateschedule", [schedule])],
        )
        .await?;
    info!(dn = %agreement, enabled, "agreement schedule updated");
    Ok(())
}

/// Locations of all agreements on `node`, optionally narrowed by `filter`.
pub async fn list_agreements(node: &DirectoryNode, filter: Option<Filter>) -> Result<Vec<Dn>> {
    let base = Filter::equal("objectclass", "nsds5ReplicationAgreement");
    let filter = match filter {
        Some(extra) => Filter::and([base, extra]),
        None => base,
    };
    let entries = node
        .client()
        .search(&layout::mapping_tree(), Scope::Subtree, &filter, &["cn"])
        .await?;
    Ok(entries.into_iter().map(|e| e.dn().clone()).collect())
}

/// Attributes read for a status report.
pub const STATUS_ATTRIBUTES: [&str; 14] = [
    "cn",
    "nsds5BeginReplicaRefresh",
    "nsds5replicaUpdateInProgress",
    "nsds5ReplicaLastInitStatus",
    "nsds5ReplicaLastInitStart",
    "nsds5ReplicaLastInitEnd",
    "nsds5replicaReapActive",
    "nsds5replicaLastUpdateStart",
    "nsds5replicaLastUpdateEnd",
    "nsds5replicaChangesSentSinceStartup",
    "nsds5replicaLastUpdateStatus",
    "nsds5replicaChangesSkippedSinceStartup",
    "nsds5ReplicaHost",
    "nsds5ReplicaPort",
];

/// Replication progress of one agreement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgreementStatus {
    /// Agreement name.
    pub name: String,
    /// Consumer host.
    pub host: String,
    /// Consumer port.
    pub port: String,
    /// Incremental update running.
    pub update_in_progress: Option<String>,
    /// Start of the last incremental update.
    pub last_update_start: Option<String>,
    /// End of the last incremental update.
    pub last_update_end: Option<String>,
    /// Changes sent since the supplier started.
    pub changes_sent: Option<String>,
    /// Changes skipped since the supplier started.
    pub changes_skipped: Option<String>,
    /// Status text of the last incremental update.
    pub last_update_status: Option<String>,
    /// Value of the total update trigger.
    pub init_in_progress: Option<String>,
    /// Start of the last total update.
    pub last_init_start: Option<String>,
    /// End of the last total update.
    pub last_init_end: Option<String>,
    /// Status text of the last total update.
    pub last_init_status: Option<String>,
    /// Tombstone reaping running.
    pub reap_active: Option<String>,
}

impl AgreementStatus {
    fn from_entry(entry: &Entry) -> Self {
        let get = |attr: &str| entry.get(attr).map(str::to_string);
        Self {
            name: get("cn").unwrap_or_default(),
            host: get("nsds5ReplicaHost").unwrap_or_default(),
            port: get("nsds5ReplicaPort").unwrap_or_default(),
            update_in_progress: get("nsds5replicaUpdateInProgress"),
            last_update_start: get("nsds5replicaLastUpdateStart"),
            last_update_end: get("nsds5replicaLastUpdateEnd"),
            changes_sent: get("nsds5replicaChangesSentSinceStartup"),
            changes_skipped: get("nsds5replicaChangesSkippedSinceStartup"),
            last_update_status: get("nsds5replicaLastUpdateStatus"),
            init_in_progress: get("nsds5BeginReplicaRefresh"),
            last_init_start: get("nsds5ReplicaLastInitStart"),
            last_init_end: get("nsds5ReplicaLastInitEnd"),
            last_init_status: get("nsds5ReplicaLastInitStatus"),
            reap_active: get("nsds5replicaReapActive"),
        }
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        writeln!(f, "Status for agmt {}:{}:{}", self.name, self.host, self.port)?;
        writeln!(f, "\tUpdate In Progress  : {}", show(&self.update_in_progress))?;
        writeln!(f, "\tLast Update Start   : {}", show(&self.last_update_start))?;
        writeln!(f, "\tLast Update End     : {}", show(&self.last_update_end))?;
        writeln!(f, "\tNum. Changes Sent   : {}", show(&self.changes_sent))?;
        writeln!(f, "\tNum. Changes Skipped: {}", show(&self.changes_skipped))?;
        writeln!(f, "\tLast Update Status  : {}", show(&self.last_update_status))?;
        writeln!(f, "\tInit in Progress    : {}", show(&self.init_in_progress))?;
        writeln!(f, "\tLast Init Start     : {}", show(&self.last_init_start))?;
        writeln!(f, "\tLast Init End       : {}", show(&self.last_init_end))?;
        writeln!(f, "\tLast Init Status    : {}", show(&self.last_init_status))?;
        write!(f, "\tReap In Progress    : {}", show(&self.reap_active))
    }
}

/// Status report of an agreement, if it exists.
pub async fn agreement_status(node: &DirectoryNode, agreement: &Dn) -> Result<Option<AgreementStatus>> {
    let entry = node
        .client()
        .get_entry(agreement, &Filter::everything(), &STATUS_ATTRIBUTES)
        .await?;
    if entry.is_none() {
        warn!(dn = %agreement, node = %node.info(), "cannot read agreement status");
    }
    Ok(entry.as_ref().map(AgreementStatus::from_entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_keys_on_suffix() {
        let consumer = NodeInfo::new("ldap2.example.com", 389);
        let a = agreement_name(&consumer, &Dn::parse("dc=example,dc=com").unwrap());
        let b = agreement_name(&consumer, &Dn::parse("o=netscaperoot").unwrap());
        assert!(a.starts_with("meToldap2.example.com389-"));
        assert_eq!(a.len(), "meToldap2.example.com389-".len() + 8);
        assert_ne!(a, b);
        // normalization makes spelling irrelevant
        assert_eq!(a, agreement_name(&consumer, &Dn::parse("DC=Example, DC=com").unwrap()));
    }

    #[test]
    fn test_name_uses_secure_port() {
        let consumer = NodeInfo::new("ldap2", 389).with_secure_port(636);
        let suffix = Dn::parse("dc=example,dc=com").unwrap();
        assert!(agreement_name(&consumer, &suffix).starts_with("meToldap2636-"));
    }

    #[test]
    fn test_entry_attributes() {
        let consumer = NodeInfo::new("ldap2", 389).with_secure_port(636);
        let suffix = Dn::parse("dc=example,dc=com").unwrap();
        let dn = layout::replica_entry(&suffix).child("cn=x");
        let opts = AgreementOptions {
            bind_password: "secret".to_string(),
            auto_init: true,
            ..AgreementOptions::default()
        };
        let entry = agreement_entry(&dn, "x", &consumer, &suffix, &opts);
        assert_eq!(entry.get("nsds5replicaport"), Some("636"));
        assert_eq!(entry.get("nsds5replicatransportinfo"), Some("SSL"));
        assert_eq!(entry.get("nsds5replicatimeout"), Some("120"));
        assert_eq!(entry.get("nsds5replicaupdateschedule"), Some(SCHEDULE_ALWAYS));
        assert_eq!(entry.get("nsds5beginreplicarefresh"), Some("start"));
        assert_eq!(entry.get("description"), Some("me to ldap2636"));
        assert!(!entry.contains("nsds7WindowsDomain"));
    }

    #[test]
    fn test_win_sync_defaults() {
        let consumer = NodeInfo::new("ad1", 389);
        let suffix = Dn::parse("dc=example,dc=com").unwrap();
        let dn = Dn::parse("cn=x,cn=config").unwrap();
        let opts = AgreementOptions {
            win_sync: Some(WinSyncOptions::default()),
            ..AgreementOptions::default()
        };
        let entry = agreement_entry(&dn, "x", &consumer, &suffix, &opts);
        assert!(entry.has_value("objectclass", "nsDSWindowsReplicationAgreement"));
        assert_eq!(entry.get("nsds7WindowsReplicaSubtree"), Some("cn=users,dc=example,dc=com"));
        assert_eq!(entry.get("nsds7DirectoryReplicaSubtree"), Some("ou=People,dc=example,dc=com"));
        assert_eq!(entry.get("nsds7NewWinUserSyncEnabled"), Some("true"));
        assert_eq!(entry.get("nsds7WindowsDomain"), Some("example.com"));
        assert!(!entry.contains("nsds5replicatransportinfo"));
    }

    #[test]
    fn test_status_display() {
        let status = AgreementStatus {
            name: "meToldap2389".to_string(),
            host: "ldap2".to_string(),
            port: "389".to_string(),
            last_init_status: Some("0 Total update succeeded".to_string()),
            ..AgreementStatus::default()
        };
        let text = status.to_string();
        assert!(text.starts_with("Status for agmt meToldap2389:ldap2:389\n"));
        assert!(text.contains("\tLast Init Status    : 0 Total update succeeded\n"));
        assert!(text.contains("\tUpdate In Progress  : -\n"));
    }
}
