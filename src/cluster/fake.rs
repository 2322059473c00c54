//! Scripted in-memory cluster used by the job tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use super::{
    ClusterClient, ClusterError, ClusterInfo, LogOptions, LogStream, ServiceId, Task, TaskState,
};
use crate::job::spec::JobSpec;

pub(crate) const FAKE_SERVICE_ID: &str = "svc-1";

#[derive(Debug, Clone)]
pub(crate) enum Poll {
    Tasks(Vec<Task>),
    Error,
}

pub(crate) struct FakeCluster {
    is_manager: bool,
    reachable: bool,
    reject_create: bool,
    fail_remove: bool,
    /// `None` makes opening the log stream fail.
    logs: Option<Vec<Result<Vec<u8>, ()>>>,
    polls: Mutex<VecDeque<Poll>>,
    pub(crate) created: Mutex<Vec<JobSpec>>,
    pub(crate) removed: Mutex<Vec<ServiceId>>,
    pub(crate) poll_count: AtomicUsize,
}

impl FakeCluster {
    /// A reachable manager cluster whose single task completes with exit code 0.
    pub(crate) fn new() -> Self {
        FakeCluster {
            is_manager: true,
            reachable: true,
            reject_create: false,
            fail_remove: false,
            logs: Some(Vec::new()),
            polls: Mutex::new(VecDeque::from([Poll::Tasks(vec![task(
                "t1",
                TaskState::Complete,
                Some(0),
            )])])),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            poll_count: AtomicUsize::new(0),
        }
    }

    /// Successive `list_tasks` answers; the last one repeats forever.
    pub(crate) fn with_polls(mut self, polls: Vec<Poll>) -> Self {
        assert!(!polls.is_empty(), "at least one poll answer is needed");
        self.polls = Mutex::new(polls.into());
        self
    }

    pub(crate) fn not_manager(mut self) -> Self {
        self.is_manager = false;
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub(crate) fn rejecting_create(mut self) -> Self {
        self.reject_create = true;
        self
    }

    pub(crate) fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub(crate) fn without_logs(mut self) -> Self {
        self.logs = None;
        self
    }

    /// Chunks served by the log stream; `Err(())` injects a read error.
    pub(crate) fn with_logs(mut self, chunks: Vec<Result<&str, ()>>) -> Self {
        self.logs = Some(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|text| text.as_bytes().to_vec()))
                .collect(),
        );
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn removed_ids(&self) -> Vec<ServiceId> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn polls_served(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }
}

pub(crate) fn task(id: &str, state: TaskState, exit_code: Option<i32>) -> Task {
    Task {
        id: id.to_string(),
        service_id: ServiceId::new(FAKE_SERVICE_ID),
        state,
        exit_code,
    }
}

fn unavailable(what: &str) -> ClusterError {
    ClusterError::Io(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("{what}: connection refused"),
    ))
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_service(&self, spec: &JobSpec) -> Result<ServiceId, ClusterError> {
        self.created.lock().unwrap().push(spec.clone());
        if self.reject_create {
            return Err(unavailable("create"));
        }
        Ok(ServiceId::new(FAKE_SERVICE_ID))
    }

    async fn remove_service(&self, service_id: &ServiceId) -> Result<(), ClusterError> {
        self.removed.lock().unwrap().push(service_id.clone());
        if self.fail_remove {
            return Err(unavailable("remove"));
        }
        Ok(())
    }

    async fn list_tasks(&self, _service_id: &ServiceId) -> Result<Vec<Task>, ClusterError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let poll = {
            let mut polls = self.polls.lock().unwrap();
            if polls.len() > 1 {
                polls.pop_front()
            } else {
                polls.front().cloned()
            }
        };
        match poll {
            Some(Poll::Tasks(tasks)) => Ok(tasks),
            Some(Poll::Error) | None => Err(unavailable("list tasks")),
        }
    }

    async fn open_logs(
        &self,
        _service_id: &ServiceId,
        _options: LogOptions,
    ) -> Result<LogStream, ClusterError> {
        let Some(chunks) = self.logs.clone() else {
            return Err(unavailable("open logs"));
        };
        Ok(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map_err(|_| unavailable("read logs"))),
        )
        .boxed())
    }

    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError> {
        if !self.reachable {
            return Err(unavailable("version"));
        }
        Ok(ClusterInfo {
            is_manager: self.is_manager,
            server_version: "v1.33.0".to_string(),
        })
    }
}
