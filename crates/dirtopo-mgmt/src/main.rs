#![warn(missing_docs)]

//! `dirtopo` command line entry point.

use anyhow::Result;
use clap::Parser;
use dirtopo_mgmt::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    tracing::debug!("dirtopo starting");

    let cli = Cli::parse();
    cli.run().await
}
