use std::collections::{BTreeMap, HashSet};
use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{AsyncBufRead, AsyncBufReadExt, SinkExt, StreamExt};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec as KubeJobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, Node, Pod, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, instrument, trace, trace_span, warn};

use super::{
    ClusterClient, ClusterError, ClusterInfo, LogOptions, LogStream, ServiceId, Task, TaskState,
};
use crate::config::JobConfig;
use crate::job::spec::{JobSpec, RestartPolicy, SchedulingMode};

pub(crate) const FIELD_MANAGER: &str = "oneshot-job";
pub(crate) const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub(crate) const RUN_LABEL: &str = "oneshot-job/run";
const CONTAINER_NAME: &str = "job";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const LOG_CHANNEL_CAPACITY: usize = 64;
/// Reported for a job that failed or vanished without a pod to take the
/// container's exit code from.
const LOST_JOB_EXIT_CODE: i32 = 1;

const REJECTED_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];
const PREPARING_WAITING_REASONS: &[&str] = &["ContainerCreating", "PodInitializing"];

/// [`ClusterClient`] backed by the Kubernetes API.
///
/// A service is a `batch/v1` Job in `namespace`; its tasks are the pods
/// carrying the job's run label.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
    ttl_after_finished: Duration,
    log_discovery_interval: Duration,
}

impl KubeClusterClient {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        job_config: &JobConfig,
        log_discovery_interval: Duration,
    ) -> Self {
        KubeClusterClient {
            client,
            namespace: namespace.into(),
            ttl_after_finished: job_config.ttl_after_finished,
            log_discovery_interval,
        }
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    #[instrument("count_eligible_nodes", skip(self), level = "debug")]
    async fn eligible_node_count(&self) -> Result<i32, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let count = nodes
            .list(&ListParams::default())
            .await?
            .items
            .iter()
            .filter(|node| node_is_eligible(node))
            .count();
        debug!("{count} nodes are eligible for a global job.");
        match i32::try_from(count) {
            Ok(0) => Err(ClusterError::NoEligibleNodes),
            Ok(count) => Ok(count),
            Err(_) => Ok(i32::MAX),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument("create_service", skip(self, spec), fields(job_name = %spec.name))]
    async fn create_service(&self, spec: &JobSpec) -> Result<ServiceId, ClusterError> {
        let replicas = match spec.mode {
            SchedulingMode::Replicated { replicas } => i32::try_from(replicas).unwrap_or(i32::MAX),
            SchedulingMode::Global => self.eligible_node_count().await?,
        };
        let manifest = job_manifest(spec, &self.namespace, self.ttl_after_finished, replicas);
        trace!(
            "Job manifest: {}",
            serde_json::to_string(&manifest).unwrap_or_default()
        );

        let post_params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self.jobs().create(&post_params, &manifest).await?;
        let name = created
            .metadata
            .name
            .ok_or(ClusterError::MissingField("metadata.name"))?;

        info!(
            "Job '{}' created in namespace '{}' with {} task(s).",
            name, self.namespace, replicas
        );
        Ok(ServiceId::new(name))
    }

    #[instrument("remove_service", skip(self), fields(job_name = %service_id))]
    async fn remove_service(&self, service_id: &ServiceId) -> Result<(), ClusterError> {
        match self
            .jobs()
            .delete(service_id.as_str(), &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!("Job '{}' removed.", service_id);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!("Job '{}' was already gone.", service_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument("list_tasks", skip(self), fields(job_name = %service_id), level = "debug")]
    async fn list_tasks(&self, service_id: &ServiceId) -> Result<Vec<Task>, ClusterError> {
        let pods = self
            .pods()
            .list(&ListParams::default().labels(&run_selector(service_id)))
            .await?;
        if !pods.items.is_empty() {
            return Ok(pods
                .items
                .iter()
                .map(|pod| task_from_pod(pod, service_id))
                .collect());
        }

        // Pods can vanish (eviction, manual deletion) after the job gave up
        // on them; the job's own conditions still say how it ended.
        match self.jobs().get(service_id.as_str()).await {
            Ok(job) => Ok(task_from_finished_job(&job, service_id)
                .into_iter()
                .collect()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                warn!("Job '{}' disappeared before it finished.", service_id);
                Ok(vec![Task {
                    id: service_id.to_string(),
                    service_id: service_id.clone(),
                    state: TaskState::Failed,
                    exit_code: Some(LOST_JOB_EXIT_CODE),
                }])
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument("open_logs", skip(self), fields(job_name = %service_id))]
    async fn open_logs(
        &self,
        service_id: &ServiceId,
        options: LogOptions,
    ) -> Result<LogStream, ClusterError> {
        // Fail synchronously when the job is not there to follow.
        self.jobs().get(service_id.as_str()).await?;

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        if !options.stdout && !options.stderr {
            // Pod logs always interleave both channels; nothing to forward.
            return Ok(rx.boxed());
        }

        tokio::spawn(
            follow_job_logs(
                self.pods(),
                run_selector(service_id),
                options.follow,
                self.log_discovery_interval,
                tx,
            )
            .in_current_span(),
        );
        Ok(rx.boxed())
    }

    #[instrument("cluster_info", skip(self))]
    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError> {
        let version = self.client.apiserver_version().await?;

        let review = SelfSubjectAccessReview {
            metadata: ObjectMeta::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(self.namespace.clone()),
                    verb: Some("create".to_string()),
                    group: Some("batch".to_string()),
                    resource: Some("jobs".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: None,
        };
        let reviews: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let reviewed = reviews.create(&PostParams::default(), &review).await?;
        let is_manager = reviewed.status.is_some_and(|status| status.allowed);

        debug!(
            "Kubernetes {} reachable, job creation allowed in '{}': {}",
            version.git_version, self.namespace, is_manager
        );
        Ok(ClusterInfo {
            is_manager,
            server_version: version.git_version,
        })
    }
}

fn run_selector(service_id: &ServiceId) -> String {
    format!("{RUN_LABEL}={service_id}")
}

fn node_is_eligible(node: &Node) -> bool {
    let schedulable = node.spec.as_ref().is_none_or(|spec| {
        !spec.unschedulable.unwrap_or(false)
            && spec.taints.as_deref().unwrap_or_default().iter().all(|taint| {
                taint.effect != "NoSchedule" && taint.effect != "NoExecute"
            })
    });
    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });
    schedulable && ready
}

pub(crate) fn job_manifest(
    spec: &JobSpec,
    namespace: &str,
    ttl_after_finished: Duration,
    replicas: i32,
) -> Job {
    let selector_labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
        (RUN_LABEL.to_string(), spec.name.clone()),
    ]);
    let annotations = (!spec.labels.is_empty()).then(|| spec.labels.clone());

    let affinity = match spec.mode {
        SchedulingMode::Global => Some(Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![
                    PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([(
                                RUN_LABEL.to_string(),
                                spec.name.clone(),
                            )])),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        SchedulingMode::Replicated { .. } => None,
    };

    let restart_policy = match spec.restart_policy {
        RestartPolicy::Never => "Never",
    };

    let env = spec
        .container
        .environment
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(selector_labels.clone()),
            annotations: annotations.clone(),
            ..Default::default()
        },
        spec: Some(KubeJobSpec {
            backoff_limit: Some(0),
            completions: Some(replicas),
            parallelism: Some(replicas),
            ttl_seconds_after_finished: Some(
                i32::try_from(ttl_after_finished.as_secs()).unwrap_or(i32::MAX),
            ),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some(restart_policy.to_string()),
                    affinity,
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(spec.container.image.clone()),
                        command: Some(spec.command.clone()),
                        args: Some(Vec::new()),
                        env: (!env.is_empty()).then_some(env),
                        working_dir: spec.container.working_dir.clone(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn task_from_pod(pod: &Pod, service_id: &ServiceId) -> Task {
    let container_state = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|status| status.state.as_ref());

    Task {
        id: pod.metadata.name.clone().unwrap_or_default(),
        service_id: service_id.clone(),
        state: pod_task_state(pod),
        exit_code: container_state
            .and_then(|state| state.terminated.as_ref())
            .map(|terminated| terminated.exit_code),
    }
}

/// A task standing in for the pods of a finished job that has none left.
///
/// `None` while the job has not reached `Complete` or `Failed`.
pub(crate) fn task_from_finished_job(job: &Job, service_id: &ServiceId) -> Option<Task> {
    let finished_as = |condition: &str| {
        job.status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == condition && c.status == "True")
            })
    };

    let (state, exit_code) = if finished_as("Failed") {
        (TaskState::Failed, Some(LOST_JOB_EXIT_CODE))
    } else if finished_as("Complete") {
        (TaskState::Complete, Some(0))
    } else {
        return None;
    };
    debug!("Job '{}' finished without any pod left.", service_id);
    Some(Task {
        id: service_id.to_string(),
        service_id: service_id.clone(),
        state,
        exit_code,
    })
}

fn pod_task_state(pod: &Pod) -> TaskState {
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("Pending");

    let state = match phase {
        "Succeeded" => return TaskState::Complete,
        "Failed" => return TaskState::Failed,
        "Running" => TaskState::Running,
        "Unknown" => TaskState::Orphaned,
        _ => pending_pod_state(pod),
    };

    if pod.metadata.deletion_timestamp.is_some() && !state.is_terminal() {
        TaskState::Shutdown
    } else {
        state
    }
}

fn pending_pod_state(pod: &Pod) -> TaskState {
    let scheduled = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_ref())
        .is_some();
    if !scheduled {
        return TaskState::Pending;
    }

    let waiting_reason = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|status| status.state.as_ref())
        .and_then(|state| state.waiting.as_ref())
        .map(|waiting| waiting.reason.as_deref().unwrap_or_default());

    match waiting_reason {
        None => TaskState::Assigned,
        Some(reason) if REJECTED_WAITING_REASONS.contains(&reason) => TaskState::Rejected,
        Some(reason) if PREPARING_WAITING_REASONS.contains(&reason) => TaskState::Preparing,
        Some(_) => TaskState::Starting,
    }
}

/// Discovers the job's pods and forwards each one's log lines into `tx`.
///
/// Ends once every discovered pod has finished and been followed, or as soon
/// as the receiving side is dropped.
#[instrument("follow_job_logs", skip(pods, tx), level = "debug")]
async fn follow_job_logs(
    pods: Api<Pod>,
    selector: String,
    follow: bool,
    discovery_interval: Duration,
    tx: mpsc::Sender<Result<Vec<u8>, ClusterError>>,
) {
    let mut followed: HashSet<String> = HashSet::new();
    let mut followers = JoinSet::new();

    loop {
        if tx.is_closed() {
            debug!("Log receiver dropped. Stop following pods.");
            followers.abort_all();
            return;
        }

        match pods.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => {
                let mut all_finished = !list.items.is_empty();
                for pod in &list.items {
                    let Some(name) = pod.metadata.name.clone() else {
                        continue;
                    };
                    let phase = pod
                        .status
                        .as_ref()
                        .and_then(|status| status.phase.as_deref())
                        .unwrap_or("Pending");
                    let finished = matches!(phase, "Succeeded" | "Failed");
                    all_finished &= finished;
                    if (finished || phase == "Running") && followed.insert(name.clone()) {
                        followers.spawn(
                            stream_pod_logs(pods.clone(), name.clone(), follow, tx.clone())
                                .instrument(trace_span!("stream_pod_logs", pod_name = %name)),
                        );
                    }
                }
                if all_finished {
                    break;
                }
            }
            Err(e) => warn!("Error while listing pods for logs: {}", e),
        }

        tokio::time::sleep(discovery_interval).await;
    }

    while followers.join_next().await.is_some() {}
    debug!("All pod log streams ended.");
}

async fn stream_pod_logs(
    pods: Api<Pod>,
    pod_name: String,
    follow: bool,
    tx: mpsc::Sender<Result<Vec<u8>, ClusterError>>,
) {
    let params = LogParams {
        follow,
        container: Some(CONTAINER_NAME.to_string()),
        ..Default::default()
    };

    let result = match pods.log_stream(&pod_name, &params).await {
        Ok(reader) => forward_log_chunks(pin!(reader), tx).await,
        Err(e) => Err(e.into()),
    };

    // Other pods keep streaming.
    if let Err(e) = result {
        warn!("Log stream of pod '{}' ended early: {}", pod_name, e);
    }
}

/// Sends the reader's bytes as they arrive, unchanged. Stops quietly once
/// the receiving side is gone.
async fn forward_log_chunks<R>(
    mut reader: R,
    mut tx: mpsc::Sender<Result<Vec<u8>, ClusterError>>,
) -> Result<(), ClusterError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?.to_vec();
        if chunk.is_empty() {
            return Ok(());
        }
        reader.consume_unpin(chunk.len());
        if tx.send(Ok(chunk)).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ContainerTemplate;
    use serde_json::json;

    fn pod(mut value: serde_json::Value) -> Pod {
        value["apiVersion"] = json!("v1");
        value["kind"] = json!("Pod");
        serde_json::from_value(value).unwrap()
    }

    fn service_id() -> ServiceId {
        ServiceId::new("prod-migrate-job-abcdefgh")
    }

    fn spec(mode: SchedulingMode) -> JobSpec {
        JobSpec {
            name: "prod-migrate-job-abcdefgh".to_string(),
            command: vec!["rake".to_string(), "db:migrate".to_string()],
            container: ContainerTemplate {
                image: "registry.example.com/app:2.1".to_string(),
                environment: BTreeMap::from([("RAILS_ENV".to_string(), "production".to_string())]),
                working_dir: Some("/app".to_string()),
            },
            labels: BTreeMap::from([("team".to_string(), "platform".to_string())]),
            mode,
            restart_policy: RestartPolicy::Never,
        }
    }

    #[tokio::test]
    async fn test_log_bytes_are_forwarded_unchanged() {
        let raw: &[u8] = b"line one\r\n\xff\xfe binary\nline three";
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);

        forward_log_chunks(futures::io::Cursor::new(raw), tx)
            .await
            .unwrap();

        let forwarded: Vec<u8> = rx
            .map(|chunk| chunk.unwrap())
            .concat()
            .await;
        assert_eq!(forwarded, raw);
    }

    fn job_with_condition(condition: Option<&str>) -> Job {
        let conditions = match condition {
            Some(type_) => json!([{ "type": type_, "status": "True" }]),
            None => json!([]),
        };
        serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "prod-migrate-job-abcdefgh" },
            "status": { "conditions": conditions }
        }))
        .unwrap()
    }

    #[test]
    fn test_failed_job_without_pods_is_a_failed_task() {
        let task = task_from_finished_job(&job_with_condition(Some("Failed")), &service_id());

        assert_eq!(
            task,
            Some(Task {
                id: "prod-migrate-job-abcdefgh".to_string(),
                service_id: service_id(),
                state: TaskState::Failed,
                exit_code: Some(LOST_JOB_EXIT_CODE),
            })
        );
    }

    #[test]
    fn test_completed_job_without_pods_is_a_complete_task() {
        let task = task_from_finished_job(&job_with_condition(Some("Complete")), &service_id());

        assert_eq!(task.map(|t| (t.state, t.exit_code)), Some((TaskState::Complete, Some(0))));
    }

    #[test]
    fn test_running_job_without_pods_has_no_task() {
        assert_eq!(task_from_finished_job(&job_with_condition(None), &service_id()), None);
        assert_eq!(
            task_from_finished_job(&job_with_condition(Some("Suspended")), &service_id()),
            None
        );
    }

    #[test]
    fn test_job_manifest_replicated() {
        let job = job_manifest(
            &spec(SchedulingMode::Replicated { replicas: 1 }),
            "batch",
            Duration::from_secs(600),
            1,
        );
        let job_spec = job.spec.unwrap();
        let pod_spec = job_spec.template.spec.unwrap();
        let container = &pod_spec.containers[0];

        assert_eq!(job.metadata.name.as_deref(), Some("prod-migrate-job-abcdefgh"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("batch"));
        assert_eq!(job_spec.backoff_limit, Some(0));
        assert_eq!(job_spec.completions, Some(1));
        assert_eq!(job_spec.parallelism, Some(1));
        assert_eq!(job_spec.ttl_seconds_after_finished, Some(600));
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert!(pod_spec.affinity.is_none());
        assert_eq!(
            container.command,
            Some(vec!["rake".to_string(), "db:migrate".to_string()])
        );
        assert_eq!(container.args, Some(Vec::new()));
        assert_eq!(container.env.as_ref().map(Vec::len), Some(1));
        assert_eq!(
            job_spec
                .template
                .metadata
                .unwrap()
                .labels
                .unwrap()
                .get(RUN_LABEL)
                .map(String::as_str),
            Some("prod-migrate-job-abcdefgh")
        );
    }

    #[test]
    fn test_job_manifest_global_spreads_over_nodes() {
        let job = job_manifest(
            &spec(SchedulingMode::Global),
            "batch",
            Duration::from_secs(600),
            3,
        );
        let job_spec = job.spec.unwrap();
        let terms = job_spec
            .template
            .spec
            .unwrap()
            .affinity
            .unwrap()
            .pod_anti_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap();

        assert_eq!(job_spec.completions, Some(3));
        assert_eq!(job_spec.parallelism, Some(3));
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].topology_key, HOSTNAME_TOPOLOGY_KEY);
    }

    #[test]
    fn test_task_from_succeeded_pod() {
        let pod = pod(json!({
            "metadata": { "name": "prod-migrate-job-abcdefgh-x2kq9" },
            "spec": { "nodeName": "node-1", "containers": [] },
            "status": {
                "phase": "Succeeded",
                "containerStatuses": [{
                    "name": "job", "image": "app", "imageID": "", "ready": false, "restartCount": 0,
                    "state": { "terminated": { "exitCode": 0 } }
                }]
            }
        }));

        assert_eq!(
            task_from_pod(&pod, &service_id()),
            Task {
                id: "prod-migrate-job-abcdefgh-x2kq9".to_string(),
                service_id: service_id(),
                state: TaskState::Complete,
                exit_code: Some(0),
            }
        );
    }

    #[test]
    fn test_task_from_failed_pod_keeps_exit_code() {
        let pod = pod(json!({
            "metadata": { "name": "p" },
            "status": {
                "phase": "Failed",
                "containerStatuses": [{
                    "name": "job", "image": "app", "imageID": "", "ready": false, "restartCount": 0,
                    "state": { "terminated": { "exitCode": 3 } }
                }]
            }
        }));
        let task = task_from_pod(&pod, &service_id());

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.exit_code, Some(3));
    }

    #[test]
    fn test_pending_pod_states() {
        let unscheduled = pod(json!({
            "metadata": { "name": "p" },
            "status": { "phase": "Pending" }
        }));
        let assigned = pod(json!({
            "metadata": { "name": "p" },
            "spec": { "nodeName": "node-1", "containers": [] },
            "status": { "phase": "Pending" }
        }));
        let waiting = |reason: &str| {
            pod(json!({
                "metadata": { "name": "p" },
                "spec": { "nodeName": "node-1", "containers": [] },
                "status": {
                    "phase": "Pending",
                    "containerStatuses": [{
                        "name": "job", "image": "app", "imageID": "", "ready": false, "restartCount": 0,
                        "state": { "waiting": { "reason": reason } }
                    }]
                }
            }))
        };

        assert_eq!(pod_task_state(&unscheduled), TaskState::Pending);
        assert_eq!(pod_task_state(&assigned), TaskState::Assigned);
        assert_eq!(
            pod_task_state(&waiting("ContainerCreating")),
            TaskState::Preparing
        );
        assert_eq!(pod_task_state(&waiting("ImagePullBackOff")), TaskState::Rejected);
        assert_eq!(pod_task_state(&waiting("Whatever")), TaskState::Starting);
        assert_eq!(task_from_pod(&waiting("ErrImagePull"), &service_id()).exit_code, None);
    }

    #[test]
    fn test_running_pod_being_deleted_is_shutdown() {
        let pod = pod(json!({
            "metadata": { "name": "p", "deletionTimestamp": "2026-10-19T10:00:00Z" },
            "status": { "phase": "Running" }
        }));

        assert_eq!(pod_task_state(&pod), TaskState::Shutdown);
    }

    #[test]
    fn test_unknown_pod_is_orphaned() {
        let pod = pod(json!({
            "metadata": { "name": "p" },
            "status": { "phase": "Unknown" }
        }));

        assert_eq!(pod_task_state(&pod), TaskState::Orphaned);
    }

    #[test]
    fn test_node_eligibility() {
        let node = |spec: serde_json::Value, ready: &str| -> Node {
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": { "name": "n" },
                "spec": spec,
                "status": { "conditions": [{ "type": "Ready", "status": ready }] }
            }))
            .unwrap()
        };

        assert!(node_is_eligible(&node(json!({}), "True")));
        assert!(!node_is_eligible(&node(json!({}), "False")));
        assert!(!node_is_eligible(&node(json!({ "unschedulable": true }), "True")));
        assert!(!node_is_eligible(&node(
            json!({ "taints": [{ "key": "node-role.kubernetes.io/control-plane", "effect": "NoSchedule" }] }),
            "True"
        )));
        assert!(node_is_eligible(&node(
            json!({ "taints": [{ "key": "spot", "effect": "PreferNoSchedule" }] }),
            "True"
        )));
    }
}
