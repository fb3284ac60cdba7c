//! Topology description files.

use dirtopo_directory::Dn;
use dirtopo_repl::{AgreementOptions, EngineConfig, NodeInfo, ReplicaRole, ReplicaSetup};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Errors loading or checking a topology description.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or shape error.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither `.toml` nor `.json`.
    #[error("unsupported config file extension: {0:?}")]
    UnsupportedFormat(String),

    /// The description is well-formed but cannot be built.
    #[error("invalid topology: {0}")]
    Invalid(String),
}

/// Load a TOML or JSON file, chosen by extension.
pub fn load_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match ext.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(&contents)?),
        "json" => Ok(serde_json::from_str(&contents)?),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

fn default_port() -> u16 {
    389
}

/// One directory server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name other sections refer to.
    pub name: String,
    /// Host name.
    pub host: String,
    /// LDAP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// LDAPS port.
    #[serde(default)]
    pub secure_port: Option<u16>,
    /// Instance identifier (`slapd-<instance>`); the node name when unset.
    #[serde(default)]
    pub instance: Option<String>,
}

impl NodeConfig {
    /// Instance identifier.
    pub fn instance(&self) -> &str {
        self.instance.as_deref().unwrap_or(&self.name)
    }

    /// Connection facts for the engine.
    pub fn node_info(&self) -> NodeInfo {
        let info = NodeInfo::new(self.host.clone(), self.port);
        match self.secure_port {
            Some(port) => info.with_secure_port(port),
            None => info,
        }
    }
}

/// A replica of one suffix on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Node name.
    pub node: String,
    /// Provisioning parameters.
    pub setup: ReplicaSetup,
}

/// A supplier → consumer agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementConfig {
    /// Supplier node name.
    pub supplier: String,
    /// Consumer node name.
    pub consumer: String,
    /// Replicated suffix.
    pub suffix: Dn,
    /// Agreement parameters.
    #[serde(default)]
    pub options: AgreementOptions,
    /// Run a total update once the agreement exists.
    #[serde(default)]
    pub initialize: bool,
}

/// A whole topology: nodes, replicas and the agreements between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Directory servers.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Replicas, applied in order.
    #[serde(default)]
    pub replicas: Vec<ReplicaConfig>,
    /// Agreements, applied in order after every replica.
    #[serde(default)]
    pub agreements: Vec<AgreementConfig>,
}

impl TopologyConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_file(path)
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Check cross-references and the constraints the engine enforces late.
    ///
    /// Every problem found is reported, one per line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                problems.push(format!("node {} defined twice", node.name));
            }
            if !addresses.insert((node.host.to_lowercase(), node.port)) {
                problems.push(format!("node {} reuses address {}:{}", node.name, node.host, node.port));
            }
        }

        let mut roles: HashMap<(&str, &Dn), ReplicaRole> = HashMap::new();
        let mut master_ids: HashMap<(&Dn, u32), &str> = HashMap::new();
        for replica in &self.replicas {
            let setup = &replica.setup;
            if self.node(&replica.node).is_none() {
                problems.push(format!("replica refers to unknown node {}", replica.node));
            }
            if roles.insert((replica.node.as_str(), &setup.suffix), setup.role).is_some() {
                problems.push(format!(
                    "node {} has two replicas of {}",
                    replica.node, setup.suffix
                ));
            }
            if setup.role == ReplicaRole::Master {
                match setup.id {
                    Some(0) => problems.push(format!(
                        "master {} of {} needs a positive replica id",
                        replica.node, setup.suffix
                    )),
                    Some(id) => {
                        if let Some(other) = master_ids.insert((&setup.suffix, id), &replica.node) {
                            problems.push(format!(
                                "replica id {} of {} used by {} and {}",
                                id, setup.suffix, other, replica.node
                            ));
                        }
                    }
                    None => {}
                }
            }
            if let Err(e) = Dn::parse(&setup.bind_dn) {
                problems.push(format!("replica on {}: {}", replica.node, e));
            }
        }

        for agreement in &self.agreements {
            let label = format!(
                "agreement {} -> {} ({})",
                agreement.supplier, agreement.consumer, agreement.suffix
            );
            if agreement.supplier == agreement.consumer {
                problems.push(format!("{}: supplier and consumer are the same node", label));
            }
            for end in [&agreement.supplier, &agreement.consumer] {
                if self.node(end).is_none() {
                    problems.push(format!("{}: unknown node {}", label, end));
                }
            }
            match roles.get(&(agreement.supplier.as_str(), &agreement.suffix)) {
                None => problems.push(format!("{}: supplier has no replica", label)),
                Some(role) if !role.is_supplier() => {
                    problems.push(format!("{}: a {} cannot supply", label, role))
                }
                Some(_) => {}
            }
            if !roles.contains_key(&(agreement.consumer.as_str(), &agreement.suffix)) {
                problems.push(format!("{}: consumer has no replica", label));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("\n")))
        }
    }
}
