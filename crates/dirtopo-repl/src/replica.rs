//! Replica registration and replica-ID allocation.

use dirtopo_directory::{Dn, Entry, Filter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

use crate::error::{Result, TopologyError};
use crate::layout;
use crate::server_config::DEFAULT_REPL_BIND_DN;
use crate::topology::{DirectoryNode, ReplicaId, ReplicaRecord, ReplicaRole};

/// Largest replica ID a master may carry.
pub const MAX_MASTER_ID: ReplicaId = 65534;

/// Hands out master replica IDs.
///
/// Shared by every registration in a topology. IDs only move forward, and
/// explicitly chosen IDs push the next automatic one past them.
#[derive(Debug)]
pub struct ReplicaIdAllocator {
    next: AtomicU32,
}

impl ReplicaIdAllocator {
    /// Allocator whose first automatic ID is `first`.
    pub fn starting_at(first: ReplicaId) -> Self {
        Self {
            next: AtomicU32::new(first.max(1)),
        }
    }

    /// Take the next ID. Fails once every ID up to [`MAX_MASTER_ID`] is used.
    pub fn allocate(&self) -> Result<ReplicaId> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next <= MAX_MASTER_ID).then_some(next + 1)
            })
            .map_err(|next| TopologyError::InvalidArgument {
                msg: format!(
                    "master replica ids exhausted: next would be {}, limit is {}",
                    next, MAX_MASTER_ID
                ),
            })
    }

    /// Note an ID chosen elsewhere so it is never handed out again.
    pub fn observe(&self, id: ReplicaId) {
        self.next.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }

    /// The ID the next [`allocate`](Self::allocate) would return.
    pub fn peek(&self) -> ReplicaId {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for ReplicaIdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Optional replica tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaExtras {
    /// Tombstone purge interval in seconds.
    pub purge_interval: Option<u64>,
    /// Purge delay in seconds.
    pub purge_delay: Option<u64>,
    /// Referral URLs handed to clients writing to a read-only replica.
    pub referrals: Vec<String>,
    /// Fractional replication attribute list, written verbatim.
    pub fractional: Option<String>,
}

/// Parameters of [`register_replica`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSpec {
    /// Suffix to replicate.
    pub suffix: Dn,
    /// Role of this node for the suffix.
    pub role: ReplicaRole,
    /// Identities allowed to push updates to this replica.
    pub bind_dns: Vec<String>,
    /// Explicit replica ID; automatic for masters when absent.
    pub id: Option<ReplicaId>,
    /// Accept updates from legacy suppliers.
    pub legacy: bool,
    /// Optional tuning.
    pub extras: ReplicaExtras,
}

impl ReplicaSpec {
    /// Spec with automatic ID and no extras. Without bind DNs the replica
    /// authorizes [`DEFAULT_REPL_BIND_DN`].
    pub fn new(suffix: Dn, role: ReplicaRole) -> Self {
        Self {
            suffix,
            role,
            bind_dns: Vec::new(),
            id: None,
            legacy: false,
            extras: ReplicaExtras::default(),
        }
    }

    /// Set an explicit replica ID.
    pub fn with_id(mut self, id: ReplicaId) -> Self {
        self.id = Some(id);
        self
    }

    /// Add an authorized supplier identity.
    pub fn with_bind_dn(mut self, dn: impl Into<String>) -> Self {
        self.bind_dns.push(dn.into());
        self
    }
}

/// Result of [`register_replica`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRegistration {
    /// Location of the replica entry.
    pub dn: Dn,
    /// Registered role.
    pub role: ReplicaRole,
    /// Replica ID in effect.
    pub id: ReplicaId,
    /// False when the replica already existed.
    pub created: bool,
}

fn parse_id(entry: &Entry) -> Result<Option<ReplicaId>> {
    match entry.get("nsds5replicaid") {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<ReplicaId>()
            .map(Some)
            .map_err(|_| TopologyError::MalformedAttribute {
                dn: entry.dn().to_string(),
                attr: "nsds5replicaid".to_string(),
                value: raw.to_string(),
            }),
    }
}

/// Register `node` as a replica of `spec.suffix`.
///
/// An existing replica entry wins: nothing is written and its ID is
/// reported (and observed by `ids` when it belongs to a master).
pub async fn register_replica(
    node: &DirectoryNode,
    spec: &ReplicaSpec,
    ids: &ReplicaIdAllocator,
) -> Result<ReplicaRegistration> {
    let dn = layout::replica_entry(&spec.suffix);
    let filter = Filter::equal("objectclass", "nsds5replica");

    if let Some(existing) = node.client().get_entry(&dn, &filter, &[]).await? {
        let id = parse_id(&existing)?.unwrap_or(0);
        if spec.role == ReplicaRole::Master && id > 0 {
            ids.observe(id);
        }
        debug!(suffix = %spec.suffix, node = %node.info(), id, "replica already registered");
        node.record_replica(
            spec.suffix.clone(),
            ReplicaRecord {
                dn: dn.clone(),
                role: spec.role,
            },
        )
        .await;
        return Ok(ReplicaRegistration {
            dn,
            role: spec.role,
            id,
            created: false,
        });
    }

    let id = match (spec.id, spec.role) {
        (Some(id), ReplicaRole::Master) if !(1..=MAX_MASTER_ID).contains(&id) => {
            return Err(TopologyError::InvalidArgument {
                msg: format!(
                    "master replica id {} for {} must be within 1..={}",
                    id, spec.suffix, MAX_MASTER_ID
                ),
            })
        }
        (Some(id), _) => {
            ids.observe(id);
            id
        }
        (None, ReplicaRole::Master) => ids.allocate()?,
        (None, _) => 0,
    };
    let bind_dns: Vec<String> = if spec.bind_dns.is_empty() {
        vec![DEFAULT_REPL_BIND_DN.to_string()]
    } else {
        spec.bind_dns.clone()
    };

    let mut entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "nsds5replica", "extensibleObject"])
        .with("cn", ["replica"])
        .with("nsds5replicaroot", [spec.suffix.to_string()])
        .with("nsds5replicaid", [id.to_string()])
        .with("nsds5replicatype", [spec.role.replica_type()])
        .with("nsds5replicabinddn", bind_dns)
        .with(
            "nsds5replicalegacyconsumer",
            [if spec.legacy { "on" } else { "off" }],
        );
    if spec.role.is_supplier() {
        entry.set("nsds5flags", ["1"]);
    }
    let extras = &spec.extras;
    if let Some(interval) = extras.purge_interval {
        entry.set("nsds5replicatombstonepurgeinterval", [interval.to_string()]);
    }
    if let Some(delay) = extras.purge_delay {
        entry.set("nsds5ReplicaPurgeDelay", [delay.to_string()]);
    }
    entry.set("nsds5ReplicaReferral", extras.referrals.iter().cloned());
    if let Some(fractional) = &extras.fractional {
        entry.set("nsDS5ReplicatedAttributeList", [fractional.as_str()]);
    }

    node.client().add(&entry).await?;
    info!(suffix = %spec.suffix, node = %node.info(), role = %spec.role, id, "registered replica");

    node.record_replica(
        spec.suffix.clone(),
        ReplicaRecord {
            dn: dn.clone(),
            role: spec.role,
        },
    )
    .await;
    Ok(ReplicaRegistration {
        dn,
        role: spec.role,
        id,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suffix::ensure_suffix;
    use crate::topology::NodeInfo;
    use dirtopo_directory::MemoryDirectory;
    use std::sync::Arc;

    async fn node_with_suffix() -> (Arc<MemoryDirectory>, DirectoryNode, Dn) {
        let dir = Arc::new(MemoryDirectory::with_server_config("test"));
        let node = DirectoryNode::new(NodeInfo::new("localhost", 389), dir.clone());
        let suffix = Dn::parse("dc=example,dc=com").unwrap();
        ensure_suffix(&node, &suffix, None).await.unwrap();
        (dir, node, suffix)
    }

    #[test]
    fn test_allocator_sequence() {
        let ids = ReplicaIdAllocator::default();
        assert_eq!(ids.allocate().unwrap(), 1);
        assert_eq!(ids.allocate().unwrap(), 2);
        ids.observe(10);
        assert_eq!(ids.allocate().unwrap(), 11);
        ids.observe(4);
        assert_eq!(ids.peek(), 12);
    }

    #[test]
    fn test_allocator_never_starts_at_zero() {
        assert_eq!(ReplicaIdAllocator::starting_at(0).allocate().unwrap(), 1);
    }

    #[test]
    fn test_allocator_stops_at_max_master_id() {
        let ids = ReplicaIdAllocator::default();
        ids.observe(MAX_MASTER_ID - 1);
        assert_eq!(ids.allocate().unwrap(), MAX_MASTER_ID);
        assert!(matches!(ids.allocate(), Err(TopologyError::InvalidArgument { .. })));
        assert!(ids.allocate().is_err());
        assert_eq!(ids.peek(), MAX_MASTER_ID + 1);
    }

    #[test]
    fn test_allocator_after_out_of_range_observe() {
        let ids = ReplicaIdAllocator::default();
        ids.observe(u32::MAX);
        assert!(ids.allocate().is_err());
        assert_eq!(ids.peek(), u32::MAX);
    }

    #[tokio::test]
    async fn test_master_entry_attributes() {
        let (dir, node, suffix) = node_with_suffix().await;
        let ids = ReplicaIdAllocator::default();
        let mut spec = ReplicaSpec::new(suffix.clone(), ReplicaRole::Master)
            .with_bind_dn("cn=replication manager,cn=config");
        spec.extras.purge_delay = Some(604800);
        spec.extras.fractional = Some("(objectclass=*) $ EXCLUDE memberof jpegphoto".to_string());

        let reg = register_replica(&node, &spec, &ids).await.unwrap();
        assert!(reg.created);
        assert_eq!(reg.id, 1);

        let entry = dir.entry(&reg.dn).await.unwrap();
        assert_eq!(entry.get("nsds5replicatype"), Some("3"));
        assert_eq!(entry.get("nsds5flags"), Some("1"));
        assert_eq!(entry.get("nsds5replicaid"), Some("1"));
        assert_eq!(entry.get("nsds5replicalegacyconsumer"), Some("off"));
        assert_eq!(entry.get("nsds5replicapurgedelay"), Some("604800"));
        assert_eq!(
            entry.get("nsds5replicatedattributelist"),
            Some("(objectclass=*) $ EXCLUDE memberof jpegphoto")
        );
        assert!(!entry.contains("nsds5ReplicaReferral"));
        assert_eq!(node.replica(&suffix).await.unwrap().role, ReplicaRole::Master);
    }

    #[tokio::test]
    async fn test_leaf_has_no_flags_and_id_zero() {
        let (dir, node, suffix) = node_with_suffix().await;
        let ids = ReplicaIdAllocator::default();
        let reg = register_replica(&node, &ReplicaSpec::new(suffix, ReplicaRole::Leaf), &ids)
            .await
            .unwrap();
        assert_eq!(reg.id, 0);
        assert_eq!(ids.peek(), 1);
        let entry = dir.entry(&reg.dn).await.unwrap();
        assert_eq!(entry.get("nsds5replicatype"), Some("2"));
        assert!(!entry.contains("nsds5flags"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (dir, node, suffix) = node_with_suffix().await;
        let ids = ReplicaIdAllocator::default();
        let spec = ReplicaSpec::new(suffix, ReplicaRole::Master).with_id(7);
        let first = register_replica(&node, &spec, &ids).await.unwrap();
        let adds = dir.counters().adds.load(Ordering::Relaxed);

        let second = register_replica(&node, &spec, &ids).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.dn, first.dn);
        assert_eq!(second.id, 7);
        assert_eq!(dir.counters().adds.load(Ordering::Relaxed), adds);
    }

    #[tokio::test]
    async fn test_existing_master_id_is_observed() {
        let (dir, node, suffix) = node_with_suffix().await;
        dir.insert(
            Entry::new(layout::replica_entry(&suffix))
                .with("objectclass", ["nsds5replica"])
                .with("nsds5replicaid", ["42"]),
        )
        .await;
        let ids = ReplicaIdAllocator::default();
        let reg = register_replica(&node, &ReplicaSpec::new(suffix, ReplicaRole::Master), &ids)
            .await
            .unwrap();
        assert_eq!(reg.id, 42);
        assert_eq!(ids.peek(), 43);
    }

    #[tokio::test]
    async fn test_malformed_existing_id() {
        let (dir, node, suffix) = node_with_suffix().await;
        dir.insert(
            Entry::new(layout::replica_entry(&suffix))
                .with("objectclass", ["nsds5replica"])
                .with("nsds5replicaid", ["forty-two"]),
        )
        .await;
        let err = register_replica(
            &node,
            &ReplicaSpec::new(suffix, ReplicaRole::Master),
            &ReplicaIdAllocator::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::MalformedAttribute { .. }));
    }

    #[tokio::test]
    async fn test_master_id_zero_rejected() {
        let (_dir, node, suffix) = node_with_suffix().await;
        let err = register_replica(
            &node,
            &ReplicaSpec::new(suffix, ReplicaRole::Master).with_id(0),
            &ReplicaIdAllocator::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_master_id_above_range_rejected() {
        let (dir, node, suffix) = node_with_suffix().await;
        let ids = ReplicaIdAllocator::default();
        let err = register_replica(
            &node,
            &ReplicaSpec::new(suffix.clone(), ReplicaRole::Master).with_id(MAX_MASTER_ID + 1),
            &ids,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidArgument { .. }));
        assert_eq!(ids.peek(), 1);
        assert!(dir.entry(&layout::replica_entry(&suffix)).await.is_none());
    }

    #[tokio::test]
    async fn test_master_at_range_end_then_exhausted() {
        let (_dir, node, suffix) = node_with_suffix().await;
        let ids = ReplicaIdAllocator::default();
        let reg = register_replica(
            &node,
            &ReplicaSpec::new(suffix, ReplicaRole::Master).with_id(MAX_MASTER_ID),
            &ids,
        )
        .await
        .unwrap();
        assert_eq!(reg.id, MAX_MASTER_ID);
        assert!(ids.allocate().is_err());
    }

    #[tokio::test]
    async fn test_default_bind_dn_when_none_given() {
        let (dir, node, suffix) = node_with_suffix().await;
        let reg = register_replica(
            &node,
            &ReplicaSpec::new(suffix, ReplicaRole::Master),
            &ReplicaIdAllocator::default(),
        )
        .await
        .unwrap();
        let entry = dir.entry(&reg.dn).await.unwrap();
        assert_eq!(entry.get_all("nsds5replicabinddn"), [DEFAULT_REPL_BIND_DN.to_string()]);
    }

    #[tokio::test]
    async fn test_explicit_bind_dns_kept() {
        let (dir, node, suffix) = node_with_suffix().await;
        let spec = ReplicaSpec::new(suffix, ReplicaRole::Hub)
            .with_bind_dn("cn=supplier a,cn=config")
            .with_bind_dn("cn=supplier b,cn=config");
        let reg = register_replica(&node, &spec, &ReplicaIdAllocator::default())
            .await
            .unwrap();
        let entry = dir.entry(&reg.dn).await.unwrap();
        assert_eq!(
            entry.get_all("nsds5replicabinddn"),
            ["cn=supplier a,cn=config".to_string(), "cn=supplier b,cn=config".to_string()]
        );
    }

    #[tokio::test]
    async fn test_without_mapping_tree_fails() {
        let dir = Arc::new(MemoryDirectory::with_server_config("test"));
        let node = DirectoryNode::new(NodeInfo::new("localhost", 389), dir);
        let suffix = Dn::parse("dc=nowhere").unwrap();
        let err = register_replica(
            &node,
            &ReplicaSpec::new(suffix, ReplicaRole::Hub),
            &ReplicaIdAllocator::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::Directory(ref e) if e.is_no_such_object()));
    }
}
