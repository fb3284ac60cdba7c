//! Local start/stop of a directory server instance.
//!
//! The control scripts return before the server is up, so completion is
//! detected by tailing the instance error log from its end.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Process control errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The error log could not be read.
    #[error("cannot read error log {path}: {source}")]
    ErrorLog {
        /// Log path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The control script could not be run.
    #[error("cannot run {program}: {source}")]
    Spawn {
        /// Script path.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    /// `start-slapd`
    Start,
    /// `stop-slapd`
    Stop,
}

impl ServerCommand {
    /// Control script name.
    pub fn script(self) -> &'static str {
        match self {
            ServerCommand::Start => "start-slapd",
            ServerCommand::Stop => "stop-slapd",
        }
    }

    /// Log line marking completion.
    pub fn completion_marker(self) -> &'static str {
        match self {
            ServerCommand::Start => "slapd started.",
            ServerCommand::Stop => "slapd stopped.",
        }
    }
}

/// How a start or stop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The completion marker appeared.
    Completed {
        /// Times the script was run.
        invocations: u32,
    },
    /// Another server holds the port.
    PortConflict {
        /// Last log line before the conflict was reported.
        last_line: Option<String>,
    },
    /// No completion marker before the deadline.
    TimedOut {
        /// Time spent.
        elapsed: Duration,
        /// Last log line seen.
        last_line: Option<String>,
    },
    /// The wait was cancelled.
    Cancelled,
}

impl ControlOutcome {
    /// True on completion.
    pub fn succeeded(&self) -> bool {
        matches!(self, ControlOutcome::Completed { .. })
    }
}

/// Starts and stops one local instance.
#[derive(Debug, Clone)]
pub struct ServerControl {
    instance_dir: PathBuf,
    error_log: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl ServerControl {
    /// Control `slapd-<instance>` under `server_root`.
    pub fn new(server_root: &Path, instance: &str) -> Self {
        let instance_dir = server_root.join(format!("slapd-{}", instance));
        let error_log = instance_dir.join("logs").join("errors");
        Self {
            instance_dir,
            error_log,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Tail a different error log.
    pub fn with_error_log(mut self, path: PathBuf) -> Self {
        self.error_log = path;
        self
    }

    /// Overall deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep between reads when the log is idle.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Instance directory holding the control scripts.
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    async fn invoke(&self, program: &Path) -> Result<(), ProcessError> {
        let status = Command::new(program)
            .current_dir(&self.instance_dir)
            .status()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: program.display().to_string(),
                source,
            })?;
        if !status.success() {
            warn!(program = %program.display(), ?status, "control script exited with failure");
        }
        Ok(())
    }

    /// Run `command` and wait for the log to confirm it.
    ///
    /// `Initialization Failed` and `exiting.` are treated as transient and
    /// the script is run again. `PR_Bind` means another server owns the port.
    pub async fn run(
        &self,
        command: ServerCommand,
        cancel: &CancellationToken,
    ) -> Result<ControlOutcome, ProcessError> {
        let log_err = |source| ProcessError::ErrorLog {
            path: self.error_log.display().to_string(),
            source,
        };
        let mut log = File::open(&self.error_log).await.map_err(log_err)?;
        log.seek(SeekFrom::End(0)).await.map_err(log_err)?;
        let mut log = BufReader::new(log);

        let program = self.instance_dir.join(command.script());
        let marker = command.completion_marker();
        let start = Instant::now();
        let deadline = start + self.timeout;

        self.invoke(&program).await?;
        let mut invocations = 1u32;
        let mut last_line: Option<String> = None;
        let mut pending = String::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(ControlOutcome::Cancelled);
            }
            let read = log.read_line(&mut pending).await.map_err(log_err)?;
            if read > 0 && pending.ends_with('\n') {
                let line = pending.trim().to_string();
                pending.clear();
                if line.is_empty() {
                    continue;
                }
                debug!(line = %line, "error log");
                if line.contains(marker) {
                    info!(instance = %self.instance_dir.display(), ?command, invocations, "server command completed");
                    return Ok(ControlOutcome::Completed { invocations });
                }
                if line.contains("PR_Bind") {
                    warn!(line = %line, "port in use by another server");
                    return Ok(ControlOutcome::PortConflict { last_line });
                }
                if line.contains("Initialization Failed") || line.contains("exiting.") {
                    warn!(line = %line, "server did not come up, running control script again");
                    self.invoke(&program).await?;
                    invocations += 1;
                }
                last_line = Some(line);
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(?command, elapsed = ?(now - start), "timed out waiting for the error log");
                return Ok(ControlOutcome::TimedOut {
                    elapsed: now - start,
                    last_line,
                });
            }
            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => return Ok(ControlOutcome::Cancelled),
            }
        }
    }

    /// Start the instance.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<ControlOutcome, ProcessError> {
        self.run(ServerCommand::Start, cancel).await
    }

    /// Stop the instance.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<ControlOutcome, ProcessError> {
        self.run(ServerCommand::Stop, cancel).await
    }
}
