use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde_json::json;
use tracing::trace;

use crate::crd::container_recreate_request::ContainerRecreateRequest;
use crate::crd::operation_job::{OperationJob, OperationJobStatus};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("api error: {0}")]
    Api(String),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound,
            kube::Error::Api(resp)
                if resp.code == 409 && resp.reason == "AlreadyExists" =>
            {
                StoreError::AlreadyExists
            }
            kube::Error::Api(resp) if resp.code == 409 => {
                StoreError::Conflict(resp.message.clone())
            }
            _ => StoreError::Api(e.to_string()),
        }
    }
}

/// Object-store operations the reconciler needs, keyed by (namespace, name).
/// Lookups return `Ok(None)` for absent objects; mutations report
/// `StoreError::NotFound` / `StoreError::AlreadyExists` so call sites can
/// decide whether those are benign.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_job(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<OperationJob>, StoreError>;

    async fn patch_job_status(
        &self,
        ns: &str,
        name: &str,
        status: &OperationJobStatus,
    ) -> Result<(), StoreError>;

    async fn patch_job_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), StoreError>;

    async fn delete_job(&self, ns: &str, name: &str) -> Result<(), StoreError>;

    async fn get_pod(&self, ns: &str, name: &str)
    -> Result<Option<Pod>, StoreError>;

    async fn list_pods(
        &self,
        ns: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError>;

    /// Merge-patch pod labels; a `None` value removes the label.
    async fn patch_pod_labels(
        &self,
        ns: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError>;

    async fn get_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<ContainerRecreateRequest>, StoreError>;

    async fn create_recreate_request(
        &self,
        ns: &str,
        crr: &ContainerRecreateRequest,
    ) -> Result<(), StoreError>;

    async fn delete_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<(), StoreError>;
}

/// `ClusterStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, ns: &str) -> Api<OperationJob> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn pods(&self, ns: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn crrs(&self, ns: &str) -> Api<ContainerRecreateRequest> {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_job(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<OperationJob>, StoreError> {
        Ok(self.jobs(ns).get_opt(name).await?)
    }

    async fn patch_job_status(
        &self,
        ns: &str,
        name: &str,
        status: &OperationJobStatus,
    ) -> Result<(), StoreError> {
        let patch = json!({ "status": status });
        trace!(%ns, %name, "store: patching job status");
        self.jobs(ns)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_job_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), StoreError> {
        let patch = json!({"metadata": {"finalizers": finalizers}});
        self.jobs(ns)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_job(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        self.jobs(ns).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_pod(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Pod>, StoreError> {
        Ok(self.pods(ns).get_opt(name).await?)
    }

    async fn list_pods(
        &self,
        ns: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pods(ns).list(&lp).await?.items)
    }

    async fn patch_pod_labels(
        &self,
        ns: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError> {
        let patch = json!({"metadata": {"labels": labels}});
        self.pods(ns)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<ContainerRecreateRequest>, StoreError> {
        Ok(self.crrs(ns).get_opt(name).await?)
    }

    async fn create_recreate_request(
        &self,
        ns: &str,
        crr: &ContainerRecreateRequest,
    ) -> Result<(), StoreError> {
        self.crrs(ns).create(&PostParams::default(), crr).await?;
        Ok(())
    }

    async fn delete_recreate_request(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        self.crrs(ns).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
