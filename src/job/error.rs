use std::time::Duration;

use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::cluster::ClusterError;
use crate::descriptor::DescriptorError;
use crate::error::SpannedErr;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job submission failed: {0}")]
    Submit(SpannedErr<ClusterError>),

    #[error("Job did not finish within {} seconds", .0.as_secs())]
    TimedOut(Duration),

    #[error("Job was interrupted before it finished")]
    Cancelled,

    #[error("Task watcher stopped without reporting an exit code")]
    WatcherLost(SpanTrace),
}

impl ExtractSpanTrace for JobError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            JobError::Submit(e) => e.span_trace(),
            JobError::WatcherLost(span_trace) => Some(span_trace),
            JobError::TimedOut(_) | JobError::Cancelled => None,
        }
    }
}

/// Failures before or while running a job, each mapped to its own exit status.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Cluster is unreachable: {0}")]
    ClusterUnreachable(SpannedErr<ClusterError>),

    #[error(
        "This identity is not allowed to create jobs in the target namespace. Switch to a context with job creation rights and try again"
    )]
    NotManager,

    #[error("{0}")]
    Job(#[from] JobError),
}

impl ExtractSpanTrace for RunError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            RunError::ClusterUnreachable(e) => e.span_trace(),
            RunError::Job(e) => e.span_trace(),
            RunError::Descriptor(_) | RunError::NotManager => None,
        }
    }
}
