//! Shipper
//!
//! A sidecar supervisor that runs a program, echoes its output and ships
//! every line to the AnvilOps log-ingestion endpoint.
//!
//! Architecture:
//! - Configuration: Load settings from the environment and strip them from
//!   what the child sees
//! - Repositories: HTTP delivery of log batches
//! - Services: Delivery queue, stream readers and batch uploader
//! - Supervisor: Child lifecycle, signal relay and shutdown sequencing
//!
//! The shipper exits with the child's exit code (or `128 + signal` if the
//! child was killed), whatever happened to the logs.

mod config;
mod repository;
mod service;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, PipelineSettings};
use crate::repository::{HttpLogRepository, local_hostname};
use crate::supervisor::{ChildSpec, Supervisor};

/// Run a program and ship its stdout/stderr to the log-ingestion endpoint
#[derive(Parser, Debug)]
#[command(name = "shipper", version)]
struct Cli {
    /// The program to run, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM [ARGS]..."
    )]
    command: Vec<OsString>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout belongs to the child
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let (config, child_env) = Config::from_env()?;
    info!(
        "Loaded configuration: endpoint={}, type={}, deployment_id={}",
        config.log_endpoint, config.log_type, config.deployment_id
    );

    let repository = Arc::new(HttpLogRepository::new(&config, local_hostname())?);

    let (program, args) = cli
        .command
        .split_first()
        .context("No program to run")?;

    let child = ChildSpec {
        program: program.clone(),
        args: args.to_vec(),
        env: child_env,
    };

    let mut supervisor = Supervisor::new(child, repository, PipelineSettings::default());
    let code = supervisor.run().await?;

    // Reader tasks may still be parked on pipes held open by grandchildren;
    // exit directly instead of waiting for the runtime to wind down.
    std::process::exit(code);
}
