#![warn(missing_docs)]

//! dirtopo replication subsystem: suffixes and backends, replica roles and
//! IDs, replication agreements, chaining, server tasks and the replica
//! initialization state machine.

pub mod agreement;
pub mod chaining;
pub mod engine;
pub mod error;
pub mod init;
pub mod layout;
pub mod poll;
pub mod replica;
pub mod retry;
pub mod server_config;
pub mod setup;
pub mod suffix;
pub mod task;
pub mod topology;

pub use agreement::{
    agreement_name, agreement_status, establish_agreement, list_agreements, toggle_schedule,
    AgreementOptions, AgreementOutcome, AgreementStatus, WinSyncOptions,
};
pub use engine::{EngineConfig, TopologyEngine};
pub use error::{Result, TopologyError};
pub use init::{classify, start_replication, InitPoll, InitState, ReplicationOutcome};
pub use poll::{PollConfig, WaitOutcome};
pub use replica::{ReplicaExtras, ReplicaIdAllocator, ReplicaRegistration, ReplicaSpec, MAX_MASTER_ID};
pub use retry::RetryPolicy;
pub use setup::{replica_setup_all, ReplicaSetup, ReplicaSetupReport};
pub use suffix::{ensure_suffix, find_parent_suffix, ChainingTarget, SuffixSetup};
pub use task::{ImportTarget, TaskKind, TaskOutcome};
pub use topology::{DirectoryNode, NodeInfo, ReplicaId, ReplicaRole};
