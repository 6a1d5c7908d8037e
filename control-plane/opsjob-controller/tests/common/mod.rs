#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodCondition, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use opsjob_controller::controller::events::{EventSink, Severity};
use opsjob_controller::controller::store::{ClusterStore, StoreError};
use opsjob_controller::controller::{EngineSettings, Reconciler};
use opsjob_controller::crd::container_recreate_request::{
    ContainerRecreateRequest, ContainerRecreateRequestPhase,
    ContainerRecreateRequestStatus,
};
use opsjob_controller::crd::operation_job::{
    OperationJob, OperationJobSpec, OperationJobStatus, OpsAction, PodOpsTarget,
};
use tokio::sync::Mutex;

pub const NS: &str = "default";
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

type Key = (String, String);

fn key(ns: &str, name: &str) -> Key {
    (ns.to_string(), name.to_string())
}

#[derive(Default)]
pub struct FakeState {
    pub jobs: HashMap<Key, OperationJob>,
    pub pods: HashMap<Key, Pod>,
    pub crrs: HashMap<Key, ContainerRecreateRequest>,
    pub crr_creates: usize,
    pub crr_deletes: usize,
    pub status_patches: usize,
    /// Reads of ContainerRecreateRequests fail with an API error
    pub fail_crr_get: bool,
    /// Reads hide existing ContainerRecreateRequests, simulating a create race
    pub hide_crrs_on_get: bool,
    /// Deleting this ContainerRecreateRequest fails with an API error
    pub fail_crr_delete: Option<String>,
}

/// In-memory object store with Kubernetes finalizer semantics for jobs.
#[derive(Default)]
pub struct FakeStore {
    pub state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert_job(&self, job: OperationJob) {
        let ns = job.metadata.namespace.clone().unwrap_or_else(|| NS.into());
        let name = job.metadata.name.clone().unwrap_or_default();
        self.state.lock().await.jobs.insert(key(&ns, &name), job);
    }

    pub async fn job(&self, name: &str) -> Option<OperationJob> {
        self.state.lock().await.jobs.get(&key(NS, name)).cloned()
    }

    pub async fn update_job(&self, name: &str, f: impl FnOnce(&mut OperationJob)) {
        let mut st = self.state.lock().await;
        if let Some(job) = st.jobs.get_mut(&key(NS, name)) {
            f(job);
        }
    }

    pub async fn insert_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state.lock().await.pods.insert(key(NS, &name), pod);
    }

    pub async fn remove_pod(&self, name: &str) {
        self.state.lock().await.pods.remove(&key(NS, name));
    }

    pub async fn pod(&self, name: &str) -> Option<Pod> {
        self.state.lock().await.pods.get(&key(NS, name)).cloned()
    }

    pub async fn crr(&self, name: &str) -> Option<ContainerRecreateRequest> {
        self.state.lock().await.crrs.get(&key(NS, name)).cloned()
    }

    pub async fn crr_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .await
            .crrs
            .keys()
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn set_crr_phase(&self, name: &str, phase: ContainerRecreateRequestPhase) {
        let mut st = self.state.lock().await;
        if let Some(crr) = st.crrs.get_mut(&key(NS, name)) {
            crr.status = Some(ContainerRecreateRequestStatus {
                phase: Some(phase),
                ..Default::default()
            });
        }
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut *self.state.lock().await)
    }
}

#[async_trait::async_trait]
impl ClusterStore for FakeStore {
    async fn get_job(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<OperationJob>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&key(ns, name)).cloned())
    }

    async fn patch_job_status(
        &self,
        ns: &str,
        name: &str,
        status: &OperationJobStatus,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let job = st.jobs.get_mut(&key(ns, name)).ok_or(StoreError::NotFound)?;
        job.status = Some(status.clone());
        st.status_patches += 1;
        Ok(())
    }

    async fn patch_job_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let k = key(ns, name);
        let job = st.jobs.get_mut(&k).ok_or(StoreError::NotFound)?;
        job.metadata.finalizers = Some(finalizers.to_vec());
        if job.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
            st.jobs.remove(&k);
        }
        Ok(())
    }

    async fn delete_job(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let k = key(ns, name);
        let job = st.jobs.get_mut(&k).ok_or(StoreError::NotFound)?;
        let has_finalizers = job
            .metadata
            .finalizers
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if has_finalizers {
            job.metadata.deletion_timestamp = Some(Time(Utc::now()));
        } else {
            st.jobs.remove(&k);
        }
        Ok(())
    }

    async fn get_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        Ok(self.state.lock().await.pods.get(&key(ns, name)).cloned())
    }

    async fn list_pods(
        &self,
        ns: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError> {
        let (lk, lv) = label_selector
            .split_once('=')
            .ok_or_else(|| StoreError::Api("unsupported selector".into()))?;
        let st = self.state.lock().await;
        Ok(st
            .pods
            .iter()
            .filter(|((pns, _), _)| pns == ns)
            .filter(|(_, p)| {
                p.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(lk))
                    .map(|v| v == lv)
                    .unwrap_or(false)
            })
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn patch_pod_labels(
        &self,
        ns: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let pod = st.pods.get_mut(&key(ns, name)).ok_or(StoreError::NotFound)?;
        let current = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            match v {
                Some(v) => {
                    current.insert(k.clone(), v.clone());
                }
                None => {
                    current.remove(k);
                }
            }
        }
        Ok(())
    }

    async fn get_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<ContainerRecreateRequest>, StoreError> {
        let st = self.state.lock().await;
        if st.fail_crr_get {
            return Err(StoreError::Api("etcdserver: request timed out".into()));
        }
        if st.hide_crrs_on_get {
            return Ok(None);
        }
        Ok(st.crrs.get(&key(ns, name)).cloned())
    }

    async fn create_recreate_request(
        &self,
        ns: &str,
        crr: &ContainerRecreateRequest,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let k = key(ns, crr.metadata.name.as_deref().unwrap_or_default());
        if st.crrs.contains_key(&k) {
            return Err(StoreError::AlreadyExists);
        }
        st.crrs.insert(k, crr.clone());
        st.crr_creates += 1;
        Ok(())
    }

    async fn delete_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        if st.fail_crr_delete.as_deref() == Some(name) {
            return Err(StoreError::Api("connection refused".into()));
        }
        st.crrs
            .remove(&key(ns, name))
            .map(|_| ())
            .ok_or(StoreError::NotFound)?;
        st.crr_deletes += 1;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub severity: Severity,
    pub reason: String,
    pub note: Option<String>,
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn publish(
        &self,
        _job: &OperationJob,
        severity: Severity,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().await.push(RecordedEvent {
            severity,
            reason: reason.to_string(),
            note,
        });
    }
}

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub events: Arc<RecordingSink>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = FakeStore::new();
        let events = RecordingSink::new();
        let reconciler = Reconciler::new(store.clone(), events.clone(), settings);
        Self {
            store,
            events,
            reconciler,
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

pub fn new_job(name: &str, action: OpsAction, pods: &[&str]) -> OperationJob {
    let mut job = OperationJob::new(
        name,
        OperationJobSpec {
            action,
            targets: pods
                .iter()
                .map(|p| PodOpsTarget {
                    pod_name: p.to_string(),
                    containers: vec![],
                })
                .collect(),
            partition: None,
            active_deadline_seconds: None,
            ttl_seconds_after_finished: None,
        },
    );
    job.metadata.namespace = Some(NS.into());
    job.metadata.uid = Some(format!("uid-{name}"));
    job.metadata.creation_timestamp = Some(Time(t0()));
    job
}

pub fn new_pod(name: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NS.into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn ready(mut pod: Pod) -> Pod {
    pod.status = Some(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "Ready".into(),
            status: "True".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

pub fn with_label(mut pod: Pod, k: &str, v: &str) -> Pod {
    pod.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(k.into(), v.into());
    pod
}
