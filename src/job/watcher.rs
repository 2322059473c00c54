use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::error::JobError;
use crate::cluster::{ClusterClient, ServiceId, Task};
use crate::config::polling::PollingConfig;

/// Keeps the exit code with the largest magnitude; ties keep the current one.
///
/// Sign is ignored when comparing, so `-3` beats `2`.
pub(crate) fn fold_exit_code(current: i32, code: i32) -> i32 {
    if code != 0 && current.unsigned_abs() < code.unsigned_abs() {
        code
    } else {
        current
    }
}

/// Folds the exit codes of `tasks` into `exit_code`, in listed order, up to
/// the first task that is still running.
///
/// Returns true only when the snapshot is non-empty and every task is
/// terminal.
pub(crate) fn observe_snapshot(tasks: &[Task], exit_code: &mut i32) -> bool {
    if tasks.is_empty() {
        return false;
    }
    for task in tasks {
        if !task.state.is_terminal() {
            return false;
        }
        if let Some(code) = task.exit_code {
            *exit_code = fold_exit_code(*exit_code, code);
        }
    }
    true
}

#[instrument("watch_tasks", skip(client, polling, cancel), fields(service_id = %service_id))]
pub(crate) async fn watch_tasks<C>(
    client: Arc<C>,
    service_id: ServiceId,
    polling: PollingConfig,
    cancel: CancellationToken,
) -> Result<i32, JobError>
where
    C: ClusterClient + ?Sized,
{
    let mut exit_code = 0;
    let mut consecutive_errors = 0u32;
    let mut polls = 0u64;

    loop {
        let listed = tokio::select! {
            _ = cancel.cancelled() => break Err(JobError::Cancelled),
            listed = client.list_tasks(&service_id) => listed,
        };

        let wait = match listed {
            Ok(tasks) => {
                consecutive_errors = 0;
                polls += 1;
                if observe_snapshot(&tasks, &mut exit_code) {
                    info!(
                        "All {} task(s) of '{}' finished after {} polls with exit code {}.",
                        tasks.len(),
                        service_id,
                        polls,
                        exit_code
                    );
                    break Ok(exit_code);
                }
                let running = tasks.iter().filter(|t| !t.state.is_terminal()).count();
                debug!(
                    "{} of {} task(s) of '{}' still running.",
                    running,
                    tasks.len(),
                    service_id
                );
                polling.poll_interval
            }
            Err(e) => {
                consecutive_errors += 1;
                let backoff = polling.backoff(consecutive_errors);
                warn!("Error while listing tasks of '{}': {}", service_id, e);
                warn!(
                    "Retrying in {} ms ({} consecutive failures)...",
                    backoff.as_millis(),
                    consecutive_errors
                );
                backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break Err(JobError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Starts [`watch_tasks`] in the background; its result arrives exactly once
/// on the returned channel.
pub(crate) fn spawn_task_watcher<C>(
    client: Arc<C>,
    service_id: ServiceId,
    polling: PollingConfig,
    cancel: CancellationToken,
) -> oneshot::Receiver<Result<i32, JobError>>
where
    C: ClusterClient + ?Sized,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(
        async move {
            let result = watch_tasks(client, service_id, polling, cancel).await;
            if tx.send(result).is_err() {
                debug!("Nobody is waiting for the task watcher anymore.");
            }
        }
        .in_current_span(),
    );
    rx
}
