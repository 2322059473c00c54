use std::sync::Arc;

use self::cli::Cli;
use self::cluster::KubeClusterClient;
use self::config::Config;
use self::descriptor::{ComposeFile, DescriptorError};
use self::job::JobRequest;
use self::job::error::{JobError, RunError};
use clap::{CommandFactory, Parser};
use thiserror::Error;
use tracing::{info, warn};
use tracing_error::ExtractSpanTrace;
use tracing_error::SpanTrace;

pub mod cli;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod job;
pub mod shutdown;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] config::ConfigLoadError),

    #[error("Missing required flag {0}")]
    MissingFlag(&'static str),

    #[error("Failed to load the service descriptor.\n{0}")]
    DescriptorError(#[from] DescriptorError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("{0}")]
    RunError(#[from] RunError),
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::RunError(e) => e.span_trace(),
            _ => None,
        }
    }
}

impl AppError {
    /// Process exit status reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ConfigError(_) => 7,
            AppError::MissingFlag(_) => 42,
            AppError::DescriptorError(e) => descriptor_exit_code(e),
            AppError::KubeClientError(_) => 1,
            AppError::RunError(e) => match e {
                RunError::Descriptor(e) => descriptor_exit_code(e),
                RunError::ClusterUnreachable(_) => 1,
                RunError::NotManager => 4,
                RunError::Job(JobError::Submit(_)) => 6,
                RunError::Job(JobError::TimedOut(_)) => 124,
                RunError::Job(JobError::Cancelled) => 130,
                RunError::Job(JobError::WatcherLost(_)) => 1,
            },
        }
    }
}

fn descriptor_exit_code(e: &DescriptorError) -> i32 {
    match e {
        DescriptorError::NotFound(_) => 42,
        DescriptorError::Unreadable(..) => 2,
        DescriptorError::Invalid(..) | DescriptorError::InvalidService { .. } => 3,
        DescriptorError::ServiceNotFound(_) => 5,
    }
}

/// Runs the job described on the command line and returns the payload's exit
/// code.
pub async fn app() -> Result<i32, AppError> {
    let cli = Cli::parse();

    if cli.command.is_empty() {
        if let Err(e) = Cli::command().print_help() {
            warn!("Failed to print usage: {e}");
        }
        return Ok(0);
    }
    let stack = cli.stack.ok_or(AppError::MissingFlag("-S/--stack"))?;
    let service = cli.service.ok_or(AppError::MissingFlag("-s/--service"))?;

    let mut config = match &cli.config {
        Some(path) => Config::new_from_file(path).await?,
        None => Config::default(),
    };
    if cli.namespace.is_some() {
        config.namespace = cli.namespace;
    }
    if cli.timeout.is_some() {
        config.timeout = cli.timeout;
    }

    info!("Config Loaded.");

    let compose = ComposeFile::load(&cli.file).await?;

    let client = kube::Client::try_default().await?;
    let namespace = config
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());

    info!("Kubernetes Client Initialized for namespace '{namespace}'.");

    let cluster = Arc::new(KubeClusterClient::new(
        client,
        namespace,
        &config.job,
        config.polling.poll_interval,
    ));
    let request = JobRequest {
        stack,
        service,
        command: cli.command,
        global: cli.global,
    };
    let cancel = shutdown::spawn_shutdown_listener();

    let exit_code = job::execute(
        cluster,
        &compose,
        config,
        request,
        tokio::io::stdout(),
        &cancel,
    )
    .await?;

    cancel.cancel();
    Ok(exit_code)
}
