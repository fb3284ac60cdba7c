//! Nodes, replica roles and the per-node record of what has been configured.

use dirtopo_directory::{DirectoryClient, Dn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Replica ID as stored in `nsds5replicaid`.
pub type ReplicaId = u32;

/// Replication role of a node for one suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    /// Writable supplier; originates changes and needs a unique replica ID.
    Master,
    /// Read-only intermediate; receives changes and forwards them.
    Hub,
    /// Read-only consumer at the edge of the topology.
    Leaf,
}

impl ReplicaRole {
    /// Value of `nsds5replicatype`.
    pub fn replica_type(self) -> &'static str {
        match self {
            ReplicaRole::Master => "3",
            ReplicaRole::Hub | ReplicaRole::Leaf => "2",
        }
    }

    /// Masters and hubs keep a changelog and feed other replicas.
    pub fn is_supplier(self) -> bool {
        !matches!(self, ReplicaRole::Leaf)
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicaRole::Master => "master",
            ReplicaRole::Hub => "hub",
            ReplicaRole::Leaf => "leaf",
        };
        f.write_str(name)
    }
}

/// Connection facts about a directory server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Host name.
    pub host: String,
    /// Plain LDAP port.
    pub port: u16,
    /// LDAPS port, when the server exposes one.
    pub secure_port: Option<u16>,
    /// Identity used to administer the node.
    pub bind_dn: String,
    /// True when the server runs on this machine.
    pub local: bool,
}

impl NodeInfo {
    /// Create node info bound as the directory manager.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let local = is_local_host(&host);
        Self {
            host,
            port,
            secure_port: None,
            bind_dn: "cn=directory manager".to_string(),
            local,
        }
    }

    /// Set the secure port.
    pub fn with_secure_port(mut self, port: u16) -> Self {
        self.secure_port = Some(port);
        self
    }

    /// Port peers should connect to: the secure port when present.
    pub fn effective_port(&self) -> u16 {
        self.secure_port.unwrap_or(self.port)
    }

    /// `ldap://host:port/`
    pub fn ldap_url(&self) -> String {
        format!("ldap://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Loopback names and addresses count as local.
pub fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host.eq_ignore_ascii_case("localhost.localdomain")
    {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// A replica registered on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRecord {
    /// DN of the `cn=replica` entry.
    pub dn: Dn,
    /// Role the replica was registered with.
    pub role: ReplicaRole,
}

/// A directory server together with the client used to reach it and what
/// this process has configured on it.
pub struct DirectoryNode {
    info: NodeInfo,
    client: Arc<dyn DirectoryClient>,
    replicas: RwLock<HashMap<Dn, ReplicaRecord>>,
    agreements: RwLock<HashMap<(String, Dn), Dn>>,
}

impl DirectoryNode {
    /// Wrap a connected client.
    pub fn new(info: NodeInfo, client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            info,
            client,
            replicas: RwLock::new(HashMap::new()),
            agreements: RwLock::new(HashMap::new()),
        }
    }

    /// Connection facts.
    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// The directory client.
    pub fn client(&self) -> &dyn DirectoryClient {
        self.client.as_ref()
    }

    /// Replica registered for `suffix`, if any.
    pub async fn replica(&self, suffix: &Dn) -> Option<ReplicaRecord> {
        self.replicas.read().await.get(suffix).cloned()
    }

    /// Remember a replica registration.
    pub async fn record_replica(&self, suffix: Dn, record: ReplicaRecord) {
        self.replicas.write().await.insert(suffix, record);
    }

    /// Suffixes with a registered replica.
    pub async fn replicated_suffixes(&self) -> Vec<Dn> {
        self.replicas.read().await.keys().cloned().collect()
    }

    /// Agreement DN from this node to `consumer` for `suffix`, if established.
    pub async fn agreement_to(&self, consumer: &NodeInfo, suffix: &Dn) -> Option<Dn> {
        self.agreements
            .read()
            .await
            .get(&(consumer.to_string(), suffix.clone()))
            .cloned()
    }

    /// Remember an established agreement.
    pub async fn record_agreement(&self, consumer: &NodeInfo, suffix: Dn, dn: Dn) {
        self.agreements
            .write()
            .await
            .insert((consumer.to_string(), suffix), dn);
    }
}

impl fmt::Debug for DirectoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryNode")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirtopo_directory::MemoryDirectory;

    fn suffix() -> Dn {
        Dn::parse("dc=example,dc=com").unwrap()
    }

    #[test]
    fn test_effective_port_prefers_secure() {
        let info = NodeInfo::new("ldap1.example.com", 389);
        assert_eq!(info.effective_port(), 389);
        let info = info.with_secure_port(636);
        assert_eq!(info.effective_port(), 636);
        assert_eq!(info.ldap_url(), "ldap://ldap1.example.com:389/");
    }

    #[test]
    fn test_local_host_detection() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("LOCALHOST.localdomain"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("ldap1.example.com"));
        assert!(!is_local_host("10.0.0.5"));
    }

    #[test]
    fn test_role_flags() {
        assert_eq!(ReplicaRole::Master.replica_type(), "3");
        assert_eq!(ReplicaRole::Hub.replica_type(), "2");
        assert_eq!(ReplicaRole::Leaf.replica_type(), "2");
        assert!(ReplicaRole::Hub.is_supplier());
        assert!(!ReplicaRole::Leaf.is_supplier());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&ReplicaRole::Hub).unwrap();
        assert_eq!(json, "\"hub\"");
        let role: ReplicaRole = serde_json::from_str("\"leaf\"").unwrap();
        assert_eq!(role, ReplicaRole::Leaf);
    }

    #[tokio::test]
    async fn test_replica_records() {
        let node = DirectoryNode::new(
            NodeInfo::new("localhost", 389),
            Arc::new(MemoryDirectory::new()),
        );
        assert!(node.replica(&suffix()).await.is_none());

        let record = ReplicaRecord {
            dn: crate::layout::replica_entry(&suffix()),
            role: ReplicaRole::Master,
        };
        node.record_replica(suffix(), record.clone()).await;
        assert_eq!(node.replica(&suffix()).await, Some(record));
        assert_eq!(node.replicated_suffixes().await, vec![suffix()]);
    }

    #[tokio::test]
    async fn test_agreement_records_keyed_by_consumer_and_suffix() {
        let node = DirectoryNode::new(
            NodeInfo::new("localhost", 389),
            Arc::new(MemoryDirectory::new()),
        );
        let consumer = NodeInfo::new("ldap2", 389);
        let other = Dn::parse("dc=other,dc=com").unwrap();
        let agmt = Dn::parse("cn=meto,cn=config").unwrap();

        node.record_agreement(&consumer, suffix(), agmt.clone()).await;
        assert_eq!(node.agreement_to(&consumer, &suffix()).await, Some(agmt));
        assert!(node.agreement_to(&consumer, &other).await.is_none());
    }
}
