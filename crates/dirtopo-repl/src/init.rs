//! Total update (replica initialization) state machine.
//!
//! ```text
//! NotStarted --begin--> InProgress --poll--> Succeeded | Failed | Busy
//!                           ^                                    |
//!                           +------------ restart (bounded) -----+
//! ```

use dirtopo_directory::{Dn, Entry, Filter, Modification};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::poll::{poll_until, PollConfig, WaitOutcome};
use crate::retry::RetryPolicy;
use crate::topology::DirectoryNode;

const TRIGGER: &str = "nsds5BeginReplicaRefresh";
const IN_PROGRESS: &str = "nsds5replicaUpdateInProgress";
const LAST_STATUS: &str = "nsds5ReplicaLastInitStatus";

/// Attributes read on every poll.
pub const INIT_ATTRIBUTES: [&str; 6] = [
    "cn",
    TRIGGER,
    IN_PROGRESS,
    LAST_STATUS,
    "nsds5ReplicaLastInitStart",
    "nsds5ReplicaLastInitEnd",
];

/// State of a total update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Not triggered.
    NotStarted,
    /// Triggered, no verdict yet.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// The consumer was busy with another supplier; worth restarting.
    Busy,
}

/// One observation of an agreement's total update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPoll {
    /// Interpreted state.
    pub state: InitState,
    /// Raw last-init status text.
    pub status: Option<String>,
}

impl InitPoll {
    /// True when this observation ends a wait.
    pub fn terminal(&self) -> bool {
        matches!(
            self.state,
            InitState::Succeeded | InitState::Failed | InitState::Busy
        )
    }
}

/// Interpret the init attributes of an agreement entry.
pub fn classify(entry: &Entry) -> InitPoll {
    let status = entry.get(LAST_STATUS).map(str::to_string);
    if entry.contains(TRIGGER) {
        return InitPoll {
            state: InitState::InProgress,
            status,
        };
    }
    let state = match status.as_deref() {
        None => InitState::InProgress,
        Some(text) if text.contains("replica busy") => InitState::Busy,
        Some(text) if text.contains("Total update succeeded") => InitState::Succeeded,
        Some(text) if entry.get(IN_PROGRESS).is_some_and(|v| v.eq_ignore_ascii_case("true")) => {
            warn!(dn = %entry.dn(), status = text, "update in progress without a trigger");
            InitState::InProgress
        }
        Some(_) => InitState::Failed,
    };
    InitPoll { state, status }
}

/// Trigger a total update on `agreement`.
pub async fn begin_init(node: &DirectoryNode, agreement: &Dn) -> Result<()> {
    node.client()
        .modify(agreement, &[Modification::replace(TRIGGER, ["start"])])
        .await?;
    info!(dn = %agreement, node = %node.info(), "total update started");
    Ok(())
}

/// Read and classify the current init state. A vanished agreement is a failure.
pub async fn poll_init(node: &DirectoryNode, agreement: &Dn) -> Result<InitPoll> {
    let entry = node
        .client()
        .get_entry(agreement, &Filter::everything(), &INIT_ATTRIBUTES)
        .await?;
    Ok(match entry {
        Some(entry) => classify(&entry),
        None => {
            warn!(dn = %agreement, node = %node.info(), "cannot read init status");
            InitPoll {
                state: InitState::Failed,
                status: None,
            }
        }
    })
}

/// Poll until the init reaches a terminal state.
pub async fn wait_for_init(
    node: &DirectoryNode,
    agreement: &Dn,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<WaitOutcome<InitPoll>> {
    poll_until(poll, cancel, move || async move {
        let observed = poll_init(node, agreement).await?;
        Ok(observed.terminal().then_some(observed))
    })
    .await
}

/// How [`start_replication`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// The consumer was initialized.
    Succeeded {
        /// Attempts made, the successful one included.
        attempts: u32,
    },
    /// The server reported a failure.
    Failed {
        /// Last status text.
        status: Option<String>,
        /// Attempts made.
        attempts: u32,
    },
    /// The consumer stayed busy for every allowed attempt.
    BusyExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// An attempt did not finish before the poll deadline.
    TimedOut {
        /// Attempts made.
        attempts: u32,
        /// Time spent in the last attempt.
        elapsed: Duration,
    },
    /// The token was cancelled.
    Cancelled {
        /// Attempts made.
        attempts: u32,
    },
}

impl ReplicationOutcome {
    /// True on success.
    pub fn succeeded(&self) -> bool {
        matches!(self, ReplicationOutcome::Succeeded { .. })
    }
}

/// Initialize the consumer of `agreement`, restarting while it reports busy.
///
/// At most `retry.max_attempts` attempts are made, with exponential backoff
/// between them.
pub async fn start_replication(
    node: &DirectoryNode,
    agreement: &Dn,
    retry: &RetryPolicy,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<ReplicationOutcome> {
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(ReplicationOutcome::Cancelled { attempts });
        }
        attempts += 1;
        begin_init(node, agreement).await?;

        let observed = match wait_for_init(node, agreement, poll, cancel).await? {
            WaitOutcome::Ready(observed) => observed,
            WaitOutcome::TimedOut { elapsed } => {
                warn!(dn = %agreement, attempts, ?elapsed, "total update timed out");
                return Ok(ReplicationOutcome::TimedOut { attempts, elapsed });
            }
            WaitOutcome::Cancelled => return Ok(ReplicationOutcome::Cancelled { attempts }),
        };

        match observed.state {
            InitState::Succeeded => {
                info!(dn = %agreement, attempts, "total update succeeded");
                return Ok(ReplicationOutcome::Succeeded { attempts });
            }
            InitState::Busy => {
                if !retry.allows(attempts) {
                    warn!(dn = %agreement, attempts, "consumer still busy, giving up");
                    return Ok(ReplicationOutcome::BusyExhausted { attempts });
                }
                let delay = retry.backoff(attempts - 1);
                info!(dn = %agreement, attempts, ?delay, "consumer busy, restarting total update");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(ReplicationOutcome::Cancelled { attempts }),
                }
            }
            InitState::Failed | InitState::InProgress | InitState::NotStarted => {
                warn!(dn = %agreement, status = ?observed.status, attempts, "total update failed");
                return Ok(ReplicationOutcome::Failed {
                    status: observed.status,
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agreement(attrs: &[(&str, &str)]) -> Entry {
        let dn = Dn::parse("cn=meto,cn=replica,cn=config").unwrap();
        attrs
            .iter()
            .fold(Entry::new(dn), |e, (name, value)| e.with(name, [*value]))
    }

    #[test]
    fn test_trigger_present_is_in_progress() {
        let poll = classify(&agreement(&[
            (TRIGGER, "start"),
            (LAST_STATUS, "0 Total update succeeded"),
        ]));
        assert_eq!(poll.state, InitState::InProgress);
        assert!(!poll.terminal());
    }

    #[test]
    fn test_succeeded() {
        let poll = classify(&agreement(&[(LAST_STATUS, "0 Total update succeeded")]));
        assert_eq!(poll.state, InitState::Succeeded);
        assert!(poll.terminal());
    }

    #[test]
    fn test_busy() {
        let poll = classify(&agreement(&[(
            LAST_STATUS,
            "-2 Total update aborted: replica busy",
        )]));
        assert_eq!(poll.state, InitState::Busy);
        assert!(poll.terminal());
    }

    #[test]
    fn test_no_status_yet() {
        let poll = classify(&agreement(&[]));
        assert_eq!(poll.state, InitState::InProgress);
        assert_eq!(poll.status, None);
    }

    #[test]
    fn test_in_progress_without_trigger_is_anomalous() {
        let poll = classify(&agreement(&[
            (IN_PROGRESS, "TRUE"),
            (LAST_STATUS, "1 something odd"),
        ]));
        assert_eq!(poll.state, InitState::InProgress);
    }

    #[test]
    fn test_other_status_fails() {
        let poll = classify(&agreement(&[
            (IN_PROGRESS, "false"),
            (LAST_STATUS, "-11 connection error"),
        ]));
        assert_eq!(poll.state, InitState::Failed);
        assert_eq!(poll.status.as_deref(), Some("-11 connection error"));
    }
}
