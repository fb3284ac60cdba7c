use crate::admin::{AdminClient, AdminServer};
use crate::config::TopologyConfig;
use crate::instance::{create_instance, InstanceSpec};
use crate::plan::Plan;
use crate::process::{ControlOutcome, ServerCommand, ServerControl};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dirtopo")]
#[command(about = "Directory replication topology manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a topology file without touching any server.
    Validate {
        config: PathBuf,
    },
    /// Apply a topology file to in-memory servers and print the resulting entries.
    Plan {
        config: PathBuf,
        #[arg(short, long)]
        node: Option<String>,
    },
    /// Start a local instance.
    Start(LocalArgs),
    /// Stop a local instance.
    Stop(LocalArgs),
    /// Operate an instance through its admin server.
    Remote {
        #[command(flatten)]
        admin: AdminArgs,
        #[command(subcommand)]
        cmd: RemoteCmd,
    },
    /// Create an instance from a TOML or JSON spec.
    CreateInstance {
        spec: PathBuf,
        #[arg(long, default_value = "300")]
        admin_timeout: u64,
    },
}

#[derive(Args, Clone)]
pub struct LocalArgs {
    pub instance: String,
    #[arg(long, env = "DIRTOPO_SERVER_ROOT", default_value = "/usr/lib/dirsrv")]
    pub server_root: PathBuf,
    #[arg(long)]
    pub error_log: Option<PathBuf>,
    #[arg(short, long, default_value = "120")]
    pub timeout: u64,
}

#[derive(Args, Clone)]
pub struct AdminArgs {
    #[arg(long)]
    pub host: String,
    #[arg(long, default_value = "9830")]
    pub admin_port: u16,
    #[arg(long)]
    pub secure: bool,
    #[arg(short, long, env = "DIRTOPO_ADMIN_USER", default_value = "admin")]
    pub user: String,
    #[arg(short, long, env = "DIRTOPO_ADMIN_PASSWORD")]
    pub password: String,
    #[arg(long, default_value = "120")]
    pub timeout: u64,
}

#[derive(Subcommand, Clone)]
pub enum RemoteCmd {
    Start { instance: String },
    Stop { instance: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Validate { ref config } => Self::validate(config),
            Command::Plan { ref config, ref node } => Self::plan(config, node.as_deref()).await,
            Command::Start(ref args) => Self::local(args, ServerCommand::Start).await,
            Command::Stop(ref args) => Self::local(args, ServerCommand::Stop).await,
            Command::Remote { ref admin, ref cmd } => Self::remote(admin, cmd).await,
            Command::CreateInstance { ref spec, admin_timeout } => {
                Self::create(spec, admin_timeout).await
            }
        }
    }

    fn validate(path: &Path) -> Result<()> {
        let config = TopologyConfig::from_file(path)?;
        config.validate()?;
        println!(
            "{}: {} nodes, {} replicas, {} agreements",
            path.display(),
            config.nodes.len(),
            config.replicas.len(),
            config.agreements.len()
        );
        Ok(())
    }

    async fn plan(path: &Path, node: Option<&str>) -> Result<()> {
        let config = TopologyConfig::from_file(path)?;
        if let Some(name) = node {
            if config.node(name).is_none() {
                anyhow::bail!("unknown node {}", name);
            }
        }
        let plan = Plan::build(&config).await?;
        print!("{}", plan.render(node).await);
        Ok(())
    }

    async fn local(args: &LocalArgs, command: ServerCommand) -> Result<()> {
        let mut control = ServerControl::new(&args.server_root, &args.instance)
            .with_timeout(Duration::from_secs(args.timeout));
        if let Some(log) = &args.error_log {
            control = control.with_error_log(log.clone());
        }

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });

        match control.run(command, &cancel).await? {
            ControlOutcome::Completed { invocations } => {
                println!("{} of {} succeeded ({} attempts)", command.script(), args.instance, invocations);
                Ok(())
            }
            ControlOutcome::PortConflict { last_line } => {
                if let Some(line) = last_line {
                    println!("{}", line);
                }
                anyhow::bail!("this server cannot be started until the other server on its port is shut down")
            }
            ControlOutcome::TimedOut { elapsed, .. } => {
                anyhow::bail!("{} of {} timed out after {:?}", command.script(), args.instance, elapsed)
            }
            ControlOutcome::Cancelled => anyhow::bail!("interrupted"),
        }
    }

    async fn remote(admin: &AdminArgs, cmd: &RemoteCmd) -> Result<()> {
        let client = AdminClient::new(
            AdminServer {
                host: admin.host.clone(),
                port: admin.admin_port,
                secure: admin.secure,
                user: admin.user.clone(),
                password: admin.password.clone(),
            },
            Duration::from_secs(admin.timeout),
        )?;
        let (action, instance, code) = match cmd {
            RemoteCmd::Start { instance } => ("start", instance, client.start(instance).await?),
            RemoteCmd::Stop { instance } => ("stop", instance, client.stop(instance).await?),
        };
        println!("{} of {} on {} returned NMC status {}", action, instance, admin.host, code);
        if code != 0 {
            anyhow::bail!("remote {} failed", action);
        }
        Ok(())
    }

    async fn create(path: &Path, admin_timeout: u64) -> Result<()> {
        let spec = InstanceSpec::from_file(path)?.resolve()?;
        let outcome = create_instance(&spec, Duration::from_secs(admin_timeout)).await?;
        println!("create {} on {}: {:?}", spec.instance, spec.host, outcome);
        if !outcome.succeeded() {
            anyhow::bail!("instance creation failed");
        }
        Ok(())
    }
}
