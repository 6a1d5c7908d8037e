use std::collections::BTreeMap;

use tracing::debug;

use crate::controller::ReconcileErr;
use crate::controller::store::{ClusterStore, StoreError};

pub const LABEL_OPERATING_PREFIX: &str = "operating.podopslifecycle.kusionstack.io";
pub const LABEL_OPERATION_TYPE_PREFIX: &str =
    "operation-type.podopslifecycle.kusionstack.io";

/// Longest job name usable in a lifecycle label key; Kubernetes caps the
/// name segment of a label key at 63 characters.
pub const MAX_FENCED_JOB_NAME_LEN: usize = 63;

/// Holds pods out of normal lifecycle handling while a job operates on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodFencing {
    /// Mark pods with the pod-ops lifecycle labels keyed by the job name.
    Lifecycle,
    /// Feature gate off: fencing is skipped.
    Disabled,
}

impl PodFencing {
    pub fn from_flag(pod_ops_lifecycle: bool) -> Self {
        if pod_ops_lifecycle {
            PodFencing::Lifecycle
        } else {
            PodFencing::Disabled
        }
    }

    /// Reject jobs whose name cannot key the lifecycle labels.
    pub fn check_job_name(&self, job_name: &str) -> Result<(), ReconcileErr> {
        match self {
            PodFencing::Lifecycle if job_name.len() > MAX_FENCED_JOB_NAME_LEN => {
                Err(ReconcileErr::InvalidJob(format!(
                    "name {job_name:?} is longer than {MAX_FENCED_JOB_NAME_LEN} characters and cannot key pod lifecycle labels"
                )))
            }
            _ => Ok(()),
        }
    }

    pub async fn fulfil(
        &self,
        store: &dyn ClusterStore,
        ns: &str,
        pod_name: &str,
        job_name: &str,
        operation_type: &str,
    ) -> Result<(), ReconcileErr> {
        match self {
            PodFencing::Disabled => Ok(()),
            PodFencing::Lifecycle => {
                let (operating, op_type) = lifecycle_labels(job_name);
                let labels = BTreeMap::from([
                    (operating, Some("true".to_string())),
                    (op_type, Some(operation_type.to_string())),
                ]);
                debug!(%ns, pod = %pod_name, "fencing: hold");
                store.patch_pod_labels(ns, pod_name, &labels).await?;
                Ok(())
            }
        }
    }

    /// Remove the hold; a missing pod counts as released.
    pub async fn release(
        &self,
        store: &dyn ClusterStore,
        ns: &str,
        pod_name: &str,
        job_name: &str,
    ) -> Result<(), ReconcileErr> {
        match self {
            PodFencing::Disabled => Ok(()),
            PodFencing::Lifecycle => {
                let (operating, op_type) = lifecycle_labels(job_name);
                let labels = BTreeMap::from([(operating, None), (op_type, None)]);
                debug!(%ns, pod = %pod_name, "fencing: release");
                match store.patch_pod_labels(ns, pod_name, &labels).await {
                    Ok(()) | Err(StoreError::NotFound) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

pub fn lifecycle_labels(job_name: &str) -> (String, String) {
    (
        format!("{}/{}", LABEL_OPERATING_PREFIX, job_name),
        format!("{}/{}", LABEL_OPERATION_TYPE_PREFIX, job_name),
    )
}
