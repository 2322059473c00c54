//! Capability surface the job runner needs from the cluster orchestrator.
//!
//! The runner only ever talks to [`ClusterClient`]; [`KubeClusterClient`]
//! renders a service as a Kubernetes `Job` and its tasks as the job's pods.

#[cfg(test)]
pub(crate) mod fake;
pub mod kubernetes;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::job::spec::JobSpec;

pub use self::kubernetes::KubeClusterClient;

/// Identifier of a service created on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        ServiceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Starting,
    Running,
    Complete,
    Failed,
    Rejected,
    Shutdown,
    Orphaned,
}

impl TaskState {
    /// Whether the orchestrator will not move the task any further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Complete | TaskState::Failed | TaskState::Rejected
        )
    }
}

/// Read-only projection of one scheduled instance of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub service_id: ServiceId,
    pub state: TaskState,
    /// Present only once a container actually ran and terminated.
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInfo {
    /// Whether this endpoint may create and remove services.
    pub is_manager: bool,
    pub server_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl LogOptions {
    /// Both output channels, kept open until the service goes away.
    pub fn follow_all() -> Self {
        LogOptions {
            follow: true,
            stdout: true,
            stderr: true,
        }
    }
}

/// Combined output of every task of a service, in arrival order.
pub type LogStream = BoxStream<'static, Result<Vec<u8>, ClusterError>>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes client error: {0}")]
    KubeClient(#[from] kube::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Created object has no '{0}' field")]
    MissingField(&'static str),

    #[error("No schedulable node available for a global job")]
    NoEligibleNodes,
}

#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Submits the job and returns the identifier of the created service.
    async fn create_service(&self, spec: &JobSpec) -> Result<ServiceId, ClusterError>;

    /// Removes the service and its tasks. Removing a service that is already
    /// gone succeeds.
    async fn remove_service(&self, service_id: &ServiceId) -> Result<(), ClusterError>;

    /// Lists every task currently known for the service.
    async fn list_tasks(&self, service_id: &ServiceId) -> Result<Vec<Task>, ClusterError>;

    async fn open_logs(
        &self,
        service_id: &ServiceId,
        options: LogOptions,
    ) -> Result<LogStream, ClusterError>;

    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError>;
}
