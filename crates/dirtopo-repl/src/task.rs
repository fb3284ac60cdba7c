//! Server-side tasks: submit an entry under `cn=tasks,cn=config` and poll it
//! until the server writes an exit code.

use chrono::Utc;
use dirtopo_directory::{Dn, Entry, Filter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TopologyError};
use crate::layout;
use crate::poll::{poll_until, PollConfig, WaitOutcome};
use crate::topology::DirectoryNode;

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Attributes the server maintains on a running task.
pub const TASK_ATTRIBUTES: [&str; 5] = [
    "nsTaskLog",
    "nsTaskStatus",
    "nsTaskExitCode",
    "nsTaskCurrentItem",
    "nsTaskTotalItems",
];

/// Task containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// LDIF import.
    Import,
    /// LDIF export.
    Export,
}

impl TaskKind {
    /// `cn=<kind>,cn=tasks,cn=config`
    pub fn container(self) -> Dn {
        match self {
            TaskKind::Import => layout::tasks().child("cn=import"),
            TaskKind::Export => layout::tasks().child("cn=export"),
        }
    }
}

/// How a task run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The server reported an exit code.
    Completed {
        /// Task name.
        name: String,
        /// 0 on success.
        exit_code: i32,
        /// Last `nsTaskStatus`, if any.
        status: Option<String>,
    },
    /// No exit code appeared before the deadline.
    TimedOut {
        /// Task name.
        name: String,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The wait was cancelled.
    Cancelled {
        /// Task name.
        name: String,
    },
}

impl TaskOutcome {
    /// Task name.
    pub fn name(&self) -> &str {
        match self {
            TaskOutcome::Completed { name, .. }
            | TaskOutcome::TimedOut { name, .. }
            | TaskOutcome::Cancelled { name } => name,
        }
    }

    /// Exit code, when the task completed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskOutcome::Completed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Completed with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }
}

/// Unique task name: `<prefix><UTC timestamp>-<sequence>`.
pub fn task_name(prefix: &str) -> String {
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}{}-{}", prefix, Utc::now().format("%Y%m%d%H%M%S"), seq)
}

fn exit_code(entry: &Entry) -> Result<Option<i32>> {
    let Some(raw) = entry.get("nsTaskExitCode") else {
        return Ok(None);
    };
    raw.trim()
        .parse::<i32>()
        .map(Some)
        .map_err(|_| TopologyError::MalformedAttribute {
            dn: entry.dn().to_string(),
            attr: "nsTaskExitCode".to_string(),
            value: raw.to_string(),
        })
}

/// Create a task under `container` and wait for its exit code.
///
/// The name is derived from the container (`cn=import` gives `import…`).
/// `attributes` are added to the task entry as given.
pub async fn run_task(
    node: &DirectoryNode,
    container: &Dn,
    attributes: &[(&str, Vec<String>)],
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<TaskOutcome> {
    let prefix = container.rdn_values().first().copied().unwrap_or("task").to_string();
    let name = task_name(&prefix);
    let dn = container.child(format!("cn={}", name));

    let mut entry = Entry::new(dn.clone())
        .with("objectclass", ["top", "extensibleObject"])
        .with("cn", [name.as_str()]);
    for (attr, values) in attributes {
        entry.add_values(attr, values.iter().cloned());
    }
    node.client().add(&entry).await?;
    info!(task = %name, node = %node.info(), "task submitted");

    let filter = &Filter::everything();
    let dn = &dn;
    let name_ref = name.as_str();
    let outcome = poll_until(poll, cancel, move || async move {
        let Some(current) = node.client().get_entry(dn, filter, &TASK_ATTRIBUTES).await? else {
            debug!(task = name_ref, "task entry not readable yet");
            return Ok(None);
        };
        if let (Some(done), Some(total)) = (
            current.get("nsTaskCurrentItem"),
            current.get("nsTaskTotalItems"),
        ) {
            debug!(task = name_ref, done, total, "task progress");
        }
        Ok(exit_code(&current)?.map(|code| (code, current.get("nsTaskStatus").map(str::to_string))))
    })
    .await?;

    Ok(match outcome {
        WaitOutcome::Ready((exit_code, status)) => TaskOutcome::Completed {
            name,
            exit_code,
            status,
        },
        WaitOutcome::TimedOut { elapsed } => {
            warn!(task = %name, ?elapsed, "task did not finish in time");
            TaskOutcome::TimedOut { name, elapsed }
        }
        WaitOutcome::Cancelled => TaskOutcome::Cancelled { name },
    })
}

/// Where an import goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// Every backend of a suffix (`nsIncludeSuffix`).
    Suffix(Dn),
    /// One backend by name (`nsInstance`).
    Backend(String),
}

fn log_result(kind: &str, file: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Completed { exit_code: 0, .. } => {
            info!(task = outcome.name(), file, "{} completed", kind)
        }
        TaskOutcome::Completed { exit_code, status, .. } => {
            error!(task = outcome.name(), file, exit_code, status = ?status, "{} failed", kind)
        }
        _ => {}
    }
}

/// Import an LDIF file. A non-zero exit code is logged, not retried.
pub async fn import_ldif(
    node: &DirectoryNode,
    file: &str,
    target: &ImportTarget,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<TaskOutcome> {
    let target_attr = match target {
        ImportTarget::Suffix(suffix) => ("nsIncludeSuffix", vec![suffix.to_string()]),
        ImportTarget::Backend(name) => ("nsInstance", vec![name.clone()]),
    };
    let attrs = [("nsFilename", vec![file.to_string()]), target_attr];
    let outcome = run_task(node, &TaskKind::Import.container(), &attrs, poll, cancel).await?;
    log_result("import", file, &outcome);
    Ok(outcome)
}

/// Export `suffix` to an LDIF file, with replication state when
/// `for_replication` is set. A non-zero exit code is logged, not retried.
pub async fn export_ldif(
    node: &DirectoryNode,
    file: &str,
    suffix: &Dn,
    for_replication: bool,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<TaskOutcome> {
    let mut attrs = vec![
        ("nsFilename", vec![file.to_string()]),
        ("nsIncludeSuffix", vec![suffix.to_string()]),
    ];
    if for_replication {
        attrs.push(("nsExportReplica", vec!["true".to_string()]));
    }
    let outcome = run_task(node, &TaskKind::Export.container(), &attrs, poll, cancel).await?;
    log_result("export", file, &outcome);
    Ok(outcome)
}
