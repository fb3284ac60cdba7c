//! Bounded, cancellable polling.
//!
//! Every wait in the engine goes through [`poll_until`], so each one carries
//! an interval, a deadline and a cancellation token.

use dirtopo_directory::{Dn, Entry, Filter};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::topology::DirectoryNode;

/// Interval and deadline of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between probes.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
    /// Sleep one interval before the first probe.
    pub delay_first: bool,
}

impl PollConfig {
    /// Waiting for a freshly added entry to become readable: 1 s polls for up to 2 hours.
    pub fn entry() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(7200),
            delay_first: false,
        }
    }

    /// Waiting for a task exit code.
    pub fn task() -> Self {
        Self {
            delay_first: true,
            ..Self::entry()
        }
    }

    /// Waiting for a replica initialization to finish.
    pub fn init() -> Self {
        Self::task()
    }

    /// Replace the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::entry()
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The probe produced a value.
    Ready(T),
    /// The deadline passed first.
    TimedOut {
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The token was cancelled first.
    Cancelled,
}

impl<T> WaitOutcome<T> {
    /// The value, if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            WaitOutcome::Ready(v) => Some(v),
            _ => None,
        }
    }

    /// True when the wait produced a value.
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready(_))
    }
}

/// Run `probe` until it yields `Some`, the deadline passes, or `cancel` fires.
///
/// Probe errors abort the wait.
pub async fn poll_until<T, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut first = true;

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        if !(first && config.delay_first) {
            if let Some(value) = probe().await? {
                return Ok(WaitOutcome::Ready(value));
            }
        }
        first = false;

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut {
                elapsed: now - start,
            });
        }
        let nap = config.interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
        }
    }
}

/// Wait until `dn` is readable on `node`.
pub async fn wait_for_entry(
    node: &DirectoryNode,
    dn: &Dn,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<WaitOutcome<Entry>> {
    let filter = &Filter::everything();
    let outcome = poll_until(config, cancel, move || async move {
        Ok(node.client().get_entry(dn, filter, &[]).await?)
    })
    .await?;
    if let WaitOutcome::TimedOut { elapsed } = &outcome {
        debug!(dn = %dn, node = %node.info(), ?elapsed, "entry never became readable");
    }
    Ok(outcome)
}
