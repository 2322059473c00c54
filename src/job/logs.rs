use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, instrument, warn};

use crate::cluster::{ClusterClient, ClusterError, LogOptions, LogStream, ServiceId};

#[derive(Error, Debug)]
pub enum LogCopyError {
    #[error("log stream failed: {0}")]
    Stream(ClusterError),

    #[error("cannot write job output: {0}")]
    Sink(std::io::Error),

    #[error("log copy task failed: {0}")]
    Join(JoinError),
}

/// What the log copy managed to deliver before it was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogDrain {
    pub bytes: u64,
    /// The stream was still open when the grace period ran out.
    pub forced: bool,
}

/// Handle on a running log copy.
pub struct LogHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, LogCopyError>>,
    copied: Arc<AtomicU64>,
}

impl LogHandle {
    /// Lets the copy drain for at most `grace`, then cuts the stream off.
    ///
    /// A copy that does not stop within another `grace` after being cut off
    /// is aborted, so this never waits longer than twice `grace`.
    #[instrument("close_log_stream", skip(self))]
    pub async fn close(mut self, grace: Duration) -> Result<LogDrain, LogCopyError> {
        if let Ok(joined) = tokio::time::timeout(grace, &mut self.task).await {
            let bytes = joined.map_err(LogCopyError::Join)??;
            return Ok(LogDrain {
                bytes,
                forced: false,
            });
        }

        debug!(
            "Log stream still open after {} ms. Closing it.",
            grace.as_millis()
        );
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(joined) => {
                let bytes = joined.map_err(LogCopyError::Join)??;
                Ok(LogDrain {
                    bytes,
                    forced: true,
                })
            }
            Err(_) => {
                warn!("Log copy did not stop after being closed. Aborting it.");
                self.task.abort();
                Ok(LogDrain {
                    bytes: self.copied.load(Ordering::Relaxed),
                    forced: true,
                })
            }
        }
    }
}

/// Opens the combined, followed output of `service_id` and copies it into
/// `sink` in the background.
///
/// Only opening the stream can fail here. Failures of the copy itself are
/// reported by [`LogHandle::close`].
#[instrument("open_log_stream", skip(client, sink, cancel), fields(service_id = %service_id))]
pub async fn open_log_stream<C, W>(
    client: &C,
    service_id: &ServiceId,
    sink: W,
    cancel: &CancellationToken,
) -> Result<LogHandle, ClusterError>
where
    C: ClusterClient + ?Sized,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let stream = client
        .open_logs(service_id, LogOptions::follow_all())
        .await?;
    let cancel = cancel.child_token();
    let copied = Arc::new(AtomicU64::new(0));
    let task = tokio::spawn(
        copy_logs(stream, sink, cancel.clone(), copied.clone()).in_current_span(),
    );
    Ok(LogHandle {
        cancel,
        task,
        copied,
    })
}

/// Copies until the stream ends or fails, or `cancel` fires. Writes and the
/// final flush give way to `cancel` too, so a stalled sink cannot hold the
/// copy open.
async fn copy_logs<W>(
    mut stream: LogStream,
    mut sink: W,
    cancel: CancellationToken,
    copied: Arc<AtomicU64>,
) -> Result<u64, LogCopyError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let result = loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                let written = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Ok(()),
                    written = sink.write_all(&bytes) => written,
                };
                if let Err(e) = written {
                    break Err(LogCopyError::Sink(e));
                }
                copied.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Some(Err(e)) => break Err(LogCopyError::Stream(e)),
            None => break Ok(()),
        }
    };

    let flushed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(()),
        flushed = sink.flush() => flushed,
    };
    result?;
    flushed.map_err(LogCopyError::Sink)?;
    Ok(copied.load(Ordering::Relaxed))
}
