//! Applying a topology description to a set of nodes, and dry runs of it
//! against in-memory directories.

use anyhow::{anyhow, Context, Result};
use dirtopo_directory::{Dn, Entry, MemoryDirectory};
use dirtopo_repl::{
    AgreementOutcome, DirectoryNode, ReplicaSetupReport, ReplicationOutcome, TopologyEngine,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{NodeConfig, TopologyConfig};

/// A replica provisioned by [`apply_topology`].
#[derive(Debug, Clone)]
pub struct AppliedReplica {
    /// Node name.
    pub node: String,
    /// What provisioning did.
    pub report: ReplicaSetupReport,
}

/// An agreement handled by [`apply_topology`].
#[derive(Debug, Clone)]
pub struct AppliedAgreement {
    /// Supplier node name.
    pub supplier: String,
    /// Consumer node name.
    pub consumer: String,
    /// Replicated suffix.
    pub suffix: Dn,
    /// Agreement result.
    pub outcome: AgreementOutcome,
    /// Total update result, when one was run.
    pub init: Option<ReplicationOutcome>,
}

/// Everything [`apply_topology`] did, in order.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Replicas, in configuration order.
    pub replicas: Vec<AppliedReplica>,
    /// Agreements, in configuration order.
    pub agreements: Vec<AppliedAgreement>,
}

impl ApplyReport {
    /// Agreements that are in place and, where requested, initialized.
    pub fn all_succeeded(&self) -> bool {
        self.agreements.iter().all(|a| {
            a.outcome.is_established() && a.init.as_ref().map_or(true, |i| i.succeeded())
        })
    }
}

fn lookup<'a>(nodes: &'a HashMap<String, DirectoryNode>, name: &str) -> Result<&'a DirectoryNode> {
    nodes
        .get(name)
        .ok_or_else(|| anyhow!("no connection for node {}", name))
}

/// Provision every replica, then every agreement of `config` on `nodes`.
///
/// Agreements flagged for initialization get a total update when
/// `initialize` is set. Stops at the first error; work already done stays.
pub async fn apply_topology(
    engine: &TopologyEngine,
    config: &TopologyConfig,
    nodes: &HashMap<String, DirectoryNode>,
    initialize: bool,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for replica in &config.replicas {
        let node = lookup(nodes, &replica.node)?;
        let setup = engine
            .setup_replica(node, &replica.setup)
            .await
            .with_context(|| format!("replica of {} on {}", replica.setup.suffix, replica.node))?;
        report.replicas.push(AppliedReplica {
            node: replica.node.clone(),
            report: setup,
        });
    }

    for agreement in &config.agreements {
        let supplier = lookup(nodes, &agreement.supplier)?;
        let consumer = lookup(nodes, &agreement.consumer)?;
        let outcome = engine
            .establish_agreement(supplier, consumer, &agreement.suffix, &agreement.options)
            .await
            .with_context(|| {
                format!(
                    "agreement {} -> {} for {}",
                    agreement.supplier, agreement.consumer, agreement.suffix
                )
            })?;

        let init = match (initialize && agreement.initialize, outcome.is_established()) {
            (true, true) => Some(engine.start_replication(supplier, outcome.dn()).await?),
            (true, false) => {
                warn!(dn = %outcome.dn(), "agreement not established, skipping total update");
                None
            }
            (false, _) => None,
        };
        report.agreements.push(AppliedAgreement {
            supplier: agreement.supplier.clone(),
            consumer: agreement.consumer.clone(),
            suffix: agreement.suffix.clone(),
            outcome,
            init,
        });
    }

    Ok(report)
}

/// One in-memory node of a dry run.
#[derive(Debug)]
pub struct PlannedNode {
    /// Its configuration.
    pub config: NodeConfig,
    /// The directory holding its entries.
    pub directory: Arc<MemoryDirectory>,
    baseline: Vec<Entry>,
}

/// A topology applied to fresh in-memory directories.
///
/// Each replicated suffix is given a root entry up front, as a populated
/// server would have. Total updates are not run.
#[derive(Debug)]
pub struct Plan {
    /// Nodes in configuration order.
    pub nodes: Vec<PlannedNode>,
    /// What applying did.
    pub report: ApplyReport,
}

impl Plan {
    /// Validate `config` and apply it to in-memory directories.
    pub async fn build(config: &TopologyConfig) -> Result<Self> {
        config.validate()?;

        let mut planned = Vec::new();
        let mut nodes = HashMap::new();
        for node_config in &config.nodes {
            let directory = Arc::new(MemoryDirectory::with_server_config(node_config.instance()));
            let suffixes: BTreeSet<&Dn> = config
                .replicas
                .iter()
                .filter(|r| r.node == node_config.name)
                .map(|r| &r.setup.suffix)
                .collect();
            for suffix in suffixes {
                directory
                    .insert(Entry::new(suffix.clone()).with("objectclass", ["top", "extensibleObject"]))
                    .await;
            }
            let baseline = directory.entries().await;
            nodes.insert(
                node_config.name.clone(),
                DirectoryNode::new(node_config.node_info(), directory.clone()),
            );
            planned.push(PlannedNode {
                config: node_config.clone(),
                directory,
                baseline,
            });
        }

        let engine = TopologyEngine::new(config.engine.clone());
        let report = apply_topology(&engine, config, &nodes, false).await?;
        info!(
            nodes = planned.len(),
            replicas = report.replicas.len(),
            agreements = report.agreements.len(),
            "plan built"
        );
        Ok(Self {
            nodes: planned,
            report,
        })
    }

    /// Entries of node `name` that applying added or changed.
    pub async fn changes(&self, name: &str) -> Option<Vec<Entry>> {
        let node = self.nodes.iter().find(|n| n.config.name == name)?;
        Some(
            node.directory
                .entries()
                .await
                .into_iter()
                .filter(|e| !node.baseline.contains(e))
                .collect(),
        )
    }

    /// LDIF of every change, grouped by node. `only` narrows to one node.
    pub async fn render(&self, only: Option<&str>) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            if only.is_some_and(|name| name != node.config.name) {
                continue;
            }
            let changes = self.changes(&node.config.name).await.unwrap_or_default();
            let _ = writeln!(
                out,
                "# {} ({}:{}) - {} entries",
                node.config.name,
                node.config.host,
                node.config.port,
                changes.len()
            );
            for entry in changes {
                let _ = writeln!(out, "{}", entry);
            }
        }
        for agreement in &self.report.agreements {
            if agreement.outcome.is_established() {
                continue;
            }
            let _ = writeln!(
                out,
                "# agreement {} -> {} not established",
                agreement.supplier, agreement.consumer
            );
        }
        out
    }
}
