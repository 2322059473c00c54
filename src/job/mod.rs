pub mod error;
pub mod logs;
pub mod runner;
pub mod spec;
pub(crate) mod watcher;

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use self::error::RunError;
use self::runner::JobRunner;
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::descriptor::DescriptorResolver;
use crate::error::SpannedExt;

/// What to run, and from which service definition.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub stack: String,
    pub service: String,
    pub command: Vec<String>,
    /// One task per eligible node instead of a single replica.
    pub global: bool,
}

/// Checks the cluster, resolves the service and runs the job on it.
///
/// Nothing is created on the cluster unless every precondition holds.
#[instrument("oneshot_job", skip_all, fields(stack = %request.stack, service = %request.service))]
pub async fn execute<C, R, W>(
    client: Arc<C>,
    resolver: &R,
    config: Config,
    request: JobRequest,
    sink: W,
    cancel: &CancellationToken,
) -> Result<i32, RunError>
where
    C: ClusterClient + ?Sized,
    R: DescriptorResolver + ?Sized,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cluster = client
        .cluster_info()
        .await
        .with_span_trace()
        .map_err(RunError::ClusterUnreachable)?;
    if !cluster.is_manager {
        return Err(RunError::NotManager);
    }
    info!("Connected to cluster {}.", cluster.server_version);

    let template = resolver.resolve(&request.stack, &request.service)?;

    let runner = JobRunner::new(client, config);
    let exit_code = runner
        .run(&template, request.command, request.global, sink, cancel)
        .await?;
    Ok(exit_code)
}
