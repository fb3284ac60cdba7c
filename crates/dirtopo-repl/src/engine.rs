//! The topology engine: shared allocator, tunables and cancellation for all
//! topology operations.

use dirtopo_directory::Dn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agreement::{establish_agreement, AgreementOptions, AgreementOutcome};
use crate::error::Result;
use crate::init::{start_replication, ReplicationOutcome};
use crate::poll::PollConfig;
use crate::replica::{register_replica, ReplicaIdAllocator, ReplicaRegistration, ReplicaSpec};
use crate::retry::RetryPolicy;
use crate::setup::{replica_setup_all, ReplicaSetup, ReplicaSetupReport};
use crate::suffix::{ensure_suffix, ChainingTarget, SuffixSetup};
use crate::task::{export_ldif, import_ldif, run_task, ImportTarget, TaskOutcome};
use crate::topology::{DirectoryNode, ReplicaId};

/// Tunables of the topology engine. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll interval while waiting for a new entry to be readable.
    pub entry_poll_interval_secs: u64,
    /// Deadline for a new entry to become readable.
    pub entry_timeout_secs: u64,
    /// Poll interval for task exit codes.
    pub task_poll_interval_secs: u64,
    /// Deadline for a task to finish.
    pub task_timeout_secs: u64,
    /// Poll interval for replica initialization.
    pub init_poll_interval_secs: u64,
    /// Deadline for one initialization attempt.
    pub init_timeout_secs: u64,
    /// Attempts allowed while the consumer reports busy.
    pub max_init_attempts: u32,
    /// Backoff before the first restart.
    pub init_initial_backoff_secs: u64,
    /// Largest backoff between restarts.
    pub init_max_backoff_secs: u64,
    /// First automatically allocated master replica ID.
    pub first_replica_id: ReplicaId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_poll_interval_secs: 1,
            entry_timeout_secs: 7200,
            task_poll_interval_secs: 1,
            task_timeout_secs: 7200,
            init_poll_interval_secs: 1,
            init_timeout_secs: 7200,
            max_init_attempts: 5,
            init_initial_backoff_secs: 1,
            init_max_backoff_secs: 60,
            first_replica_id: 1,
        }
    }
}

impl EngineConfig {
    /// Polling for entry readability.
    pub fn entry_poll(&self) -> PollConfig {
        PollConfig::entry()
            .with_interval(Duration::from_secs(self.entry_poll_interval_secs))
            .with_timeout(Duration::from_secs(self.entry_timeout_secs))
    }

    /// Polling for task completion.
    pub fn task_poll(&self) -> PollConfig {
        PollConfig::task()
            .with_interval(Duration::from_secs(self.task_poll_interval_secs))
            .with_timeout(Duration::from_secs(self.task_timeout_secs))
    }

    /// Polling for initialization.
    pub fn init_poll(&self) -> PollConfig {
        PollConfig::init()
            .with_interval(Duration::from_secs(self.init_poll_interval_secs))
            .with_timeout(Duration::from_secs(self.init_timeout_secs))
    }

    /// Busy-retry policy for initialization.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_init_attempts,
            initial_backoff: Duration::from_secs(self.init_initial_backoff_secs),
            max_backoff: Duration::from_secs(self.init_max_backoff_secs),
            ..RetryPolicy::default()
        }
    }
}

/// Entry point for building and operating a topology.
///
/// Owns the replica-ID allocator shared by every registration and a
/// cancellation token that bounds every wait it starts.
#[derive(Debug)]
pub struct TopologyEngine {
    config: EngineConfig,
    ids: Arc<ReplicaIdAllocator>,
    cancel: CancellationToken,
}

impl TopologyEngine {
    /// Create an engine.
    pub fn new(config: EngineConfig) -> Self {
        let ids = Arc::new(ReplicaIdAllocator::starting_at(config.first_replica_id));
        Self {
            config,
            ids,
            cancel: CancellationToken::new(),
        }
    }

    /// Engine tunables.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The replica-ID allocator.
    pub fn ids(&self) -> Arc<ReplicaIdAllocator> {
        self.ids.clone()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort every wait in progress and refuse to wait again.
    pub fn shutdown(&self) {
        info!("topology engine shutting down");
        self.cancel.cancel();
    }

    /// See [`ensure_suffix`].
    pub async fn ensure_suffix(
        &self,
        node: &DirectoryNode,
        suffix: &Dn,
        chaining: Option<&ChainingTarget>,
    ) -> Result<SuffixSetup> {
        ensure_suffix(node, suffix, chaining).await
    }

    /// See [`register_replica`].
    pub async fn register_replica(&self, node: &DirectoryNode, spec: &ReplicaSpec) -> Result<ReplicaRegistration> {
        register_replica(node, spec, &self.ids).await
    }

    /// See [`replica_setup_all`].
    pub async fn setup_replica(&self, node: &DirectoryNode, setup: &ReplicaSetup) -> Result<ReplicaSetupReport> {
        replica_setup_all(node, setup, &self.ids).await
    }

    /// See [`establish_agreement`].
    pub async fn establish_agreement(
        &self,
        supplier: &DirectoryNode,
        consumer: &DirectoryNode,
        suffix: &Dn,
        opts: &AgreementOptions,
    ) -> Result<AgreementOutcome> {
        establish_agreement(supplier, consumer, suffix, opts, &self.config.entry_poll(), &self.cancel).await
    }

    /// See [`start_replication`].
    pub async fn start_replication(&self, node: &DirectoryNode, agreement: &Dn) -> Result<ReplicationOutcome> {
        start_replication(
            node,
            agreement,
            &self.config.retry_policy(),
            &self.config.init_poll(),
            &self.cancel,
        )
        .await
    }

    /// See [`run_task`].
    pub async fn run_task(
        &self,
        node: &DirectoryNode,
        container: &Dn,
        attributes: &[(&str, Vec<String>)],
    ) -> Result<TaskOutcome> {
        run_task(node, container, attributes, &self.config.task_poll(), &self.cancel).await
    }

    /// See [`import_ldif`].
    pub async fn import_ldif(&self, node: &DirectoryNode, file: &str, target: &ImportTarget) -> Result<TaskOutcome> {
        import_ldif(node, file, target, &self.config.task_poll(), &self.cancel).await
    }

    /// See [`export_ldif`].
    pub async fn export_ldif(
        &self,
        node: &DirectoryNode,
        file: &str,
        suffix: &Dn,
        for_replication: bool,
    ) -> Result<TaskOutcome> {
        export_ldif(node, file, suffix, for_replication, &self.config.task_poll(), &self.cancel).await
    }
}

impl Default for TopologyEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
