#![warn(missing_docs)]

//! dirtopo management subsystem: topology files, dry-run planning, CLI,
//! admin server transport, local process control, instance creation

pub mod admin;
pub mod cli;
pub mod config;
pub mod instance;
pub mod plan;
pub mod process;

pub use admin::{parse_nmc_status, AdminClient, AdminError, AdminServer};
pub use config::{AgreementConfig, ConfigError, NodeConfig, ReplicaConfig, TopologyConfig};
pub use instance::{create_instance, default_suffix, CreateOutcome, InstanceError, InstanceSpec, ResolvedInstance};
pub use plan::{apply_topology, ApplyReport, Plan};
pub use process::{ControlOutcome, ProcessError, ServerCommand, ServerControl};
