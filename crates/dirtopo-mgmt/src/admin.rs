//! Admin server transport: form-encoded POSTs to the console CGI endpoints.
//!
//! The admin server only answers clients that identify as the console, and
//! reports the result of an operation as an `NMC_Status: <code>` line in the
//! response body.

use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// User agent the admin server expects.
pub const CONSOLE_USER_AGENT: &str = "Fedora-Console/1.0";

/// Status reported when the response carries no `NMC_Status` line.
pub const DEFAULT_NMC_STATUS: i32 = 1;

/// Admin transport errors.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Connection or protocol failure.
    #[error("admin request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the request.
    #[error("admin server returned HTTP {status} for {uri}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request path.
        uri: String,
    },

    /// An `NMC_Status` line whose code is not a number.
    #[error("malformed NMC status line: {0:?}")]
    MalformedStatus(String),
}

/// Extract the `NMC_Status` code from a response body.
///
/// Only the first status line counts. A body without one yields
/// [`DEFAULT_NMC_STATUS`].
pub fn parse_nmc_status(body: &str) -> Result<i32, AdminError> {
    for line in body.lines() {
        let mut parts = line.splitn(2, ':');
        if let (Some("NMC_Status"), Some(code)) = (parts.next(), parts.next()) {
            return code
                .trim()
                .parse()
                .map_err(|_| AdminError::MalformedStatus(line.to_string()));
        }
    }
    Ok(DEFAULT_NMC_STATUS)
}

/// Credentials and address of an admin server.
#[derive(Debug, Clone)]
pub struct AdminServer {
    /// Host name.
    pub host: String,
    /// Admin server port.
    pub port: u16,
    /// Use HTTPS.
    pub secure: bool,
    /// Configuration directory administrator.
    pub user: String,
    /// Administrator password.
    pub password: String,
}

/// Client for one admin server.
pub struct AdminClient {
    client: Client,
    server: AdminServer,
}

impl AdminClient {
    /// Create a client with a request timeout.
    pub fn new(server: AdminServer, timeout: Duration) -> Result<Self, AdminError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, server })
    }

    /// Base URL, `http[s]://host:port`.
    pub fn base_url(&self) -> String {
        let scheme = if self.server.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server.host, self.server.port)
    }

    /// POST `args` to `uri` and return the NMC status code.
    pub async fn post(&self, uri: &str, args: &[(&str, String)]) -> Result<i32, AdminError> {
        let url = format!("{}{}", self.base_url(), uri);
        debug!(url = %url, "admin request");
        let response = self
            .client
            .post(&url)
            .header(USER_AGENT, CONSOLE_USER_AGENT)
            .basic_auth(&self.server.user, Some(&self.server.password))
            .form(args)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdminError::Status {
                status: response.status().as_u16(),
                uri: uri.to_string(),
            });
        }
        let body = response.text().await?;
        let code = parse_nmc_status(&body)?;
        if code == 0 {
            info!(uri, host = %self.server.host, "admin operation succeeded");
        } else {
            warn!(uri, host = %self.server.host, code, "admin operation failed");
        }
        Ok(code)
    }

    /// Start instance `slapd-<instance>`.
    pub async fn start(&self, instance: &str) -> Result<i32, AdminError> {
        self.post(&format!("/slapd-{}/Tasks/Operation/start", instance), &[])
            .await
    }

    /// Stop instance `slapd-<instance>`.
    pub async fn stop(&self, instance: &str) -> Result<i32, AdminError> {
        self.post(&format!("/slapd-{}/Tasks/Operation/stop", instance), &[])
            .await
    }

    /// Create an instance from CGI arguments.
    pub async fn create(&self, args: &[(&str, String)]) -> Result<i32, AdminError> {
        self.post("/slapd/Tasks/Operation/Create", args).await
    }
}
