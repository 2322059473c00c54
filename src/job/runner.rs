use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};
use tracing_error::SpanTrace;

use super::error::JobError;
use super::logs::open_log_stream;
use super::spec::JobSpec;
use super::watcher::spawn_task_watcher;
use crate::cluster::{ClusterClient, ServiceId};
use crate::config::Config;
use crate::descriptor::ServiceTemplate;
use crate::error::{SpannedExt, warn_with_span_trace};

/// Exclusive ownership of a service created for one run.
///
/// [`ServiceLease::release`] removes the service at most once. A lease
/// dropped without being released removes it in the background.
pub(crate) struct ServiceLease<C: ClusterClient + ?Sized> {
    client: Arc<C>,
    service_id: Option<ServiceId>,
}

impl<C: ClusterClient + ?Sized> ServiceLease<C> {
    pub(crate) fn new(client: Arc<C>, service_id: ServiceId) -> Self {
        ServiceLease {
            client,
            service_id: Some(service_id),
        }
    }

    /// A lease for a service that was never created.
    #[cfg(test)]
    pub(crate) fn empty(client: Arc<C>) -> Self {
        ServiceLease {
            client,
            service_id: None,
        }
    }

    /// Returns whether a removal was issued.
    #[instrument("release_service", skip(self))]
    pub(crate) async fn release(&mut self) -> bool {
        let Some(service_id) = self.service_id.take() else {
            debug!("No service to remove.");
            return false;
        };

        info!("Removing job '{}'...", service_id);
        if let Err(e) = self
            .client
            .remove_service(&service_id)
            .await
            .with_span_trace()
        {
            warn_with_span_trace(&format!("Failed to remove job '{service_id}'"), &e);
        }
        true
    }
}

impl<C: ClusterClient + ?Sized> Drop for ServiceLease<C> {
    fn drop(&mut self) {
        let Some(service_id) = self.service_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Job '{}' was not removed: no runtime left.", service_id);
            return;
        };

        warn!("Job '{}' was not released. Removing it in the background.", service_id);
        let client = self.client.clone();
        runtime.spawn(
            async move {
                if let Err(e) = client.remove_service(&service_id).await {
                    warn!("Failed to remove job '{}': {}", service_id, e);
                }
            }
            .in_current_span(),
        );
    }
}

/// Drives one ephemeral job from submission to teardown.
pub struct JobRunner<C: ClusterClient + ?Sized> {
    client: Arc<C>,
    config: Config,
}

impl<C: ClusterClient + ?Sized> JobRunner<C> {
    pub fn new(client: Arc<C>, config: Config) -> Self {
        JobRunner { client, config }
    }

    /// Runs `command` on `template` and returns the aggregated exit code.
    ///
    /// A non-zero exit code of the job itself is `Ok`. Once the service is
    /// created it is removed on every path out of this function.
    #[instrument("run_job", skip_all, fields(service = %template.name, global = global))]
    pub async fn run<W>(
        &self,
        template: &ServiceTemplate,
        command: Vec<String>,
        global: bool,
        sink: W,
        cancel: &CancellationToken,
    ) -> Result<i32, JobError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let spec = JobSpec::build(
            template,
            command,
            global,
            self.config.job.name_suffix_length,
        );
        info!(
            "Submitting job '{}' ({:?}) running {:?}...",
            spec.name,
            spec.mode,
            spec.command
        );

        let service_id = self
            .client
            .create_service(&spec)
            .await
            .with_span_trace()
            .map_err(JobError::Submit)?;
        let mut lease = ServiceLease::new(self.client.clone(), service_id.clone());

        let result = self.supervise(&service_id, sink, cancel).await;

        lease.release().await;
        result
    }

    async fn supervise<W>(
        &self,
        service_id: &ServiceId,
        sink: W,
        cancel: &CancellationToken,
    ) -> Result<i32, JobError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let run_cancel = cancel.child_token();
        let exit_code_rx = spawn_task_watcher(
            self.client.clone(),
            service_id.clone(),
            self.config.polling.clone(),
            run_cancel.clone(),
        );

        let logs = match open_log_stream(&*self.client, service_id, sink, &run_cancel).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(
                    "Cannot stream output of job '{}', continuing without it: {}",
                    service_id, e
                );
                None
            }
        };

        let timeout = self.config.timeout;
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            received = exit_code_rx => match received {
                Ok(result) => result,
                Err(_) => Err(JobError::WatcherLost(SpanTrace::capture())),
            },
            _ = deadline => {
                let timeout = timeout.unwrap_or_default();
                error!(
                    "Job '{}' did not finish within {} seconds.",
                    service_id,
                    timeout.as_secs()
                );
                run_cancel.cancel();
                Err(JobError::TimedOut(timeout))
            }
        };

        if let Some(logs) = logs {
            match logs.close(self.config.logs.drain_grace).await {
                Ok(drain) if drain.forced => debug!(
                    "Output of job '{}' cut off after {} bytes.",
                    service_id, drain.bytes
                ),
                Ok(drain) => debug!(
                    "Output of job '{}' fully delivered ({} bytes).",
                    service_id, drain.bytes
                ),
                Err(e) => warn!("Output of job '{}' may be incomplete: {}", service_id, e),
            }
        }

        run_cancel.cancel();
        result
    }
}
