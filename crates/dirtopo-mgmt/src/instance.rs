//! Directory server instance creation, locally through the setup program or
//! remotely through the admin server.

use dirtopo_repl::topology::is_local_host;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::admin::{AdminClient, AdminError, AdminServer};
use crate::config::{load_file, ConfigError};

/// Suffix of the configuration directory.
pub const CONFIG_SUFFIX: &str = "o=NetscapeRoot";

/// Server user when none is given and the caller is root.
pub const DEFAULT_USER_ID: &str = "nobody";

/// Instance creation errors.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Required parameters are absent; nothing was attempted.
    #[error("missing required arguments: {}", .0.join(", "))]
    MissingArguments(Vec<String>),

    /// Remote creation failed at the transport level.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// The spec file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local setup could not be run.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being done.
        action: &'static str,
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Domain part of a host name; the name itself when it has no dot.
pub fn domain_name(host: &str) -> &str {
    match host.find('.') {
        Some(i) => &host[i + 1..],
        None => host,
    }
}

/// Suffix derived from a host's domain: `a.example.com` gives `dc=example,dc=com`.
pub fn default_suffix(host: &str) -> String {
    let domain = domain_name(host);
    if domain.is_empty() {
        "dc=localdomain".to_string()
    } else {
        format!("dc={}", domain.replace('.', ",dc="))
    }
}

/// Configuration directory the new instance registers with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDirectorySpec {
    /// Host; the new instance's host when local.
    pub host: Option<String>,
    /// Port; 55555 when local.
    pub port: Option<u16>,
    /// Administrator DN or uid.
    pub user: Option<String>,
    /// Administrator password; a placeholder when local.
    pub password: Option<String>,
    /// Admin domain; the host's domain when unset.
    pub admin_domain: Option<String>,
}

/// Parameters of a new instance, as given by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSpec {
    /// Host; the local host when unset.
    pub host: Option<String>,
    /// LDAP port; 389 when unset.
    pub port: Option<u16>,
    /// Root DN; `cn=directory manager` when unset.
    pub root_dn: Option<String>,
    /// Root password.
    pub root_password: Option<String>,
    /// Instance identifier.
    pub instance: Option<String>,
    /// Initial suffix; derived from the host's domain when unset.
    pub suffix: Option<String>,
    /// Account the server runs as.
    pub user_id: Option<String>,
    /// Configuration directory registration.
    pub config_directory: Option<ConfigDirectorySpec>,
    /// Admin server port, required for remote hosts.
    pub admin_port: Option<u16>,
    /// Talk HTTPS to the admin server.
    pub secure_admin: bool,
    /// Installation prefix holding `sbin/`.
    pub prefix: Option<PathBuf>,
    /// Use the setup program that also configures the admin server.
    pub with_admin: bool,
    /// Extra configuration LDIF files.
    pub config_files: Vec<String>,
    /// Extra schema files.
    pub schema_files: Vec<String>,
}

/// Resolved configuration directory registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDirectory {
    /// Host.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Administrator.
    pub user: String,
    /// Password.
    pub password: String,
    /// Admin domain.
    pub admin_domain: String,
}

/// Instance parameters with every default applied and every requirement met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    /// Host.
    pub host: String,
    /// LDAP port.
    pub port: u16,
    /// Root DN.
    pub root_dn: String,
    /// Root password.
    pub root_password: String,
    /// Instance identifier.
    pub instance: String,
    /// Initial suffix.
    pub suffix: String,
    /// Server account.
    pub user_id: String,
    /// Host is this machine.
    pub is_local: bool,
    /// Configuration directory registration.
    pub config_directory: Option<ConfigDirectory>,
    /// Admin server port.
    pub admin_port: Option<u16>,
    /// Admin server uses HTTPS.
    pub secure_admin: bool,
    /// Directory of the setup programs.
    pub sbin_dir: PathBuf,
    /// Admin-aware setup.
    pub with_admin: bool,
    /// Extra configuration files.
    pub config_files: Vec<String>,
    /// Extra schema files.
    pub schema_files: Vec<String>,
}

fn default_user_id() -> String {
    match std::env::var("LOGNAME") {
        Ok(user) if !user.is_empty() && user != "root" => user,
        _ => DEFAULT_USER_ID.to_string(),
    }
}

impl InstanceSpec {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, InstanceError> {
        Ok(load_file(path)?)
    }

    /// Apply defaults and check requirements.
    ///
    /// Every missing parameter is reported at once, before anything is
    /// attempted.
    pub fn resolve(&self) -> Result<ResolvedInstance, InstanceError> {
        let host = self.host.clone().unwrap_or_else(|| "localhost".to_string());
        let is_local = is_local_host(&host);
        let mut missing = Vec::new();

        let root_password = self.root_password.clone().unwrap_or_else(|| {
            missing.push("root_password".to_string());
            String::new()
        });
        let instance = self.instance.clone().unwrap_or_else(|| {
            missing.push("instance".to_string());
            String::new()
        });

        let config_directory = if !is_local || self.config_directory.is_some() {
            let spec = self.config_directory.clone().unwrap_or_default();
            let mut required = |value: Option<String>, name: &str| {
                value.unwrap_or_else(|| {
                    missing.push(format!("config_directory.{}", name));
                    String::new()
                })
            };
            let (local_host, local_password) = if is_local {
                (Some(host.clone()), Some("dummy".to_string()))
            } else {
                (None, None)
            };
            let cfg_host = required(spec.host.or(local_host), "host");
            let cfg_user = required(spec.user, "user");
            let cfg_password = required(spec.password.or(local_password), "password");
            let port = match (spec.port, is_local) {
                (Some(port), _) => port,
                (None, true) => 55555,
                (None, false) => {
                    missing.push("config_directory.port".to_string());
                    0
                }
            };
            Some(ConfigDirectory {
                host: cfg_host,
                port,
                user: cfg_user,
                password: cfg_password,
                admin_domain: spec
                    .admin_domain
                    .unwrap_or_else(|| domain_name(&host).to_string()),
            })
        } else {
            None
        };

        if !is_local && self.admin_port.is_none() {
            missing.push("admin_port".to_string());
        }
        if !missing.is_empty() {
            return Err(InstanceError::MissingArguments(missing));
        }

        let sbin_dir = match &self.prefix {
            Some(prefix) => prefix.join("sbin"),
            None => PathBuf::from("/usr/sbin"),
        };
        Ok(ResolvedInstance {
            port: self.port.unwrap_or(389),
            root_dn: self
                .root_dn
                .clone()
                .unwrap_or_else(|| "cn=directory manager".to_string()),
            root_password,
            instance,
            suffix: self.suffix.clone().unwrap_or_else(|| default_suffix(&host)),
            user_id: self.user_id.clone().unwrap_or_else(default_user_id),
            is_local,
            config_directory,
            admin_port: self.admin_port,
            secure_admin: self.secure_admin,
            sbin_dir,
            with_admin: self.with_admin,
            config_files: self.config_files.clone(),
            schema_files: self.schema_files.clone(),
            host,
        })
    }
}

impl ResolvedInstance {
    /// Form arguments of the admin server's create operation.
    pub fn cgi_args(&self) -> Vec<(&'static str, String)> {
        let mut args = vec![
            ("servname", self.host.clone()),
            ("servport", self.port.to_string()),
            ("rootdn", self.root_dn.clone()),
            ("rootpw", self.root_password.clone()),
            ("servid", self.instance.clone()),
            ("suffix", self.suffix.clone()),
            ("servuser", self.user_id.clone()),
            ("start_server", "1".to_string()),
        ];
        if let Some(cfg) = &self.config_directory {
            args.push(("cfg_sspt_uid", cfg.user.clone()));
            args.push(("cfg_sspt_uid_pw", cfg.password.clone()));
            args.push((
                "ldap_url",
                format!("ldap://{}:{}/{}", cfg.host, cfg.port, CONFIG_SUFFIX),
            ));
            args.push(("admin_domain", cfg.admin_domain.clone()));
        }
        args
    }

    /// `.inf` answer file for the local setup program.
    pub fn inf_content(&self) -> String {
        let mut content = format!(
            "[General]\nFullMachineName= {}\nSuiteSpotUserID= {}\n",
            self.host, self.user_id
        );
        if let (true, Some(cfg)) = (self.with_admin, &self.config_directory) {
            content.push_str(&format!(
                "ConfigDirectoryLdapURL= ldap://{}:{}/{}\nConfigDirectoryAdminID= {}\nConfigDirectoryAdminPwd= {}\nAdminDomain= {}\n",
                cfg.host, cfg.port, CONFIG_SUFFIX, cfg.user, cfg.password, cfg.admin_domain
            ));
        }
        content.push_str(&format!(
            "\n[slapd]\nServerPort= {}\nRootDN= {}\nRootDNPwd= {}\nServerIdentifier= {}\nSuffix= {}\n",
            self.port, self.root_dn, self.root_password, self.instance, self.suffix
        ));
        for file in &self.config_files {
            content.push_str(&format!("ConfigFile= {}\n", file));
        }
        for file in &self.schema_files {
            content.push_str(&format!("SchemaFile= {}\n", file));
        }
        content
    }

    /// Local setup program.
    pub fn setup_program(&self) -> PathBuf {
        let name = if self.with_admin {
            "setup-ds-admin.pl"
        } else {
            "setup-ds.pl"
        };
        self.sbin_dir.join(name)
    }
}

/// How instance creation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Created through the admin server.
    Remote {
        /// NMC status code; 0 on success.
        nmc_status: i32,
    },
    /// Created by running the setup program.
    Local {
        /// Program run.
        program: PathBuf,
        /// Its exit code, if it exited normally.
        exit_code: Option<i32>,
    },
}

impl CreateOutcome {
    /// True when the server reported success.
    pub fn succeeded(&self) -> bool {
        match self {
            CreateOutcome::Remote { nmc_status } => *nmc_status == 0,
            CreateOutcome::Local { exit_code, .. } => *exit_code == Some(0),
        }
    }
}

/// Create the instance described by `spec`.
pub async fn create_instance(
    spec: &ResolvedInstance,
    admin_timeout: Duration,
) -> Result<CreateOutcome, InstanceError> {
    if !spec.is_local {
        let (Some(cfg), Some(port)) = (&spec.config_directory, spec.admin_port) else {
            return Err(InstanceError::MissingArguments(vec!["admin_port".to_string()]));
        };
        let client = AdminClient::new(
            AdminServer {
                host: spec.host.clone(),
                port,
                secure: spec.secure_admin,
                user: cfg.user.clone(),
                password: cfg.password.clone(),
            },
            admin_timeout,
        )?;
        let nmc_status = client.create(&spec.cgi_args()).await?;
        info!(host = %spec.host, instance = %spec.instance, nmc_status, "remote create finished");
        return Ok(CreateOutcome::Remote { nmc_status });
    }

    let program = spec.setup_program();
    let inf = std::env::temp_dir().join(format!(
        "dirtopo-{}-{}.inf",
        spec.instance,
        std::process::id()
    ));
    tokio::fs::write(&inf, spec.inf_content())
        .await
        .map_err(|source| InstanceError::Io {
            action: "cannot write",
            path: inf.display().to_string(),
            source,
        })?;

    let status = Command::new(&program)
        .arg("-s")
        .arg("-f")
        .arg(&inf)
        .status()
        .await;
    if let Err(e) = tokio::fs::remove_file(&inf).await {
        warn!(path = %inf.display(), error = %e, "cannot remove answer file");
    }
    let status = status.map_err(|source| InstanceError::Io {
        action: "cannot run",
        path: program.display().to_string(),
        source,
    })?;

    info!(program = %program.display(), instance = %spec.instance, code = ?status.code(), "setup finished");
    Ok(CreateOutcome::Local {
        program,
        exit_code: status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_spec() -> InstanceSpec {
        InstanceSpec {
            root_password: Some("secret".to_string()),
            instance: Some("m1".to_string()),
            ..InstanceSpec::default()
        }
    }

    #[test]
    fn test_default_suffix() {
        assert_eq!(default_suffix("ldap1.example.com"), "dc=example,dc=com");
        assert_eq!(default_suffix("ldap1."), "dc=localdomain");
        assert_eq!(domain_name("standalone"), "standalone");
    }

    #[test]
    fn test_local_defaults() {
        let resolved = local_spec().resolve().unwrap();
        assert!(resolved.is_local);
        assert_eq!(resolved.host, "localhost");
        assert_eq!(resolved.port, 389);
        assert_eq!(resolved.root_dn, "cn=directory manager");
        assert_eq!(resolved.suffix, "dc=localhost");
        assert!(resolved.config_directory.is_none());
        assert_eq!(resolved.setup_program(), PathBuf::from("/usr/sbin/setup-ds.pl"));
    }

    #[test]
    fn test_local_with_config_directory() {
        let spec = InstanceSpec {
            config_directory: Some(ConfigDirectorySpec {
                user: Some("admin".to_string()),
                ..ConfigDirectorySpec::default()
            }),
            with_admin: true,
            prefix: Some(PathBuf::from("/opt/dirsrv")),
            ..local_spec()
        };
        let resolved = spec.resolve().unwrap();
        let cfg = resolved.config_directory.as_ref().unwrap();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 55555);
        assert_eq!(cfg.password, "dummy");
        assert_eq!(
            resolved.setup_program(),
            PathBuf::from("/opt/dirsrv/sbin/setup-ds-admin.pl")
        );
        assert!(resolved
            .inf_content()
            .contains("ConfigDirectoryLdapURL= ldap://localhost:55555/o=NetscapeRoot"));
    }

    #[test]
    fn test_missing_arguments_reported_together() {
        let spec = InstanceSpec {
            host: Some("ldap9.example.com".to_string()),
            ..InstanceSpec::default()
        };
        let Err(InstanceError::MissingArguments(missing)) = spec.resolve() else {
            panic!("expected missing arguments");
        };
        for name in [
            "root_password",
            "instance",
            "config_directory.host",
            "config_directory.user",
            "config_directory.password",
            "config_directory.port",
            "admin_port",
        ] {
            assert!(missing.iter().any(|m| m == name), "{} not reported", name);
        }
    }

    #[test]
    fn test_remote_cgi_args() {
        let spec = InstanceSpec {
            host: Some("ldap9.example.com".to_string()),
            port: Some(1389),
            user_id: Some("dirsrv".to_string()),
            admin_port: Some(9830),
            config_directory: Some(ConfigDirectorySpec {
                host: Some("cfg.example.com".to_string()),
                port: Some(389),
                user: Some("admin".to_string()),
                password: Some("pw".to_string()),
                admin_domain: None,
            }),
            ..local_spec()
        };
        let resolved = spec.resolve().unwrap();
        assert!(!resolved.is_local);
        let args = resolved.cgi_args();
        let get = |key: &str| args.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());
        assert_eq!(get("servport"), Some("1389"));
        assert_eq!(get("suffix"), Some("dc=example,dc=com"));
        assert_eq!(get("servuser"), Some("dirsrv"));
        assert_eq!(get("start_server"), Some("1"));
        assert_eq!(get("ldap_url"), Some("ldap://cfg.example.com:389/o=NetscapeRoot"));
        assert_eq!(get("admin_domain"), Some("example.com"));
    }

    #[test]
    fn test_inf_content_lists_extra_files() {
        let spec = InstanceSpec {
            user_id: Some("dirsrv".to_string()),
            schema_files: vec!["/tmp/99user.ldif".to_string()],
            ..local_spec()
        };
        let inf = spec.resolve().unwrap().inf_content();
        assert!(inf.starts_with("[General]\nFullMachineName= localhost\nSuiteSpotUserID= dirsrv\n"));
        assert!(inf.contains("[slapd]\nServerPort= 389\n"));
        assert!(inf.contains("ServerIdentifier= m1\n"));
        assert!(inf.ends_with("SchemaFile= /tmp/99user.ldif\n"));
        assert!(!inf.contains("ConfigDirectoryLdapURL"));
    }
}
