use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use super::ReconcileErr;
use super::candidate::OpsCandidate;
use super::store::ClusterStore;
use crate::crd::operation_job::{
    ANNOTATION_RECREATE_METHOD, OperationJob, OpsAction,
};

pub mod fencing;
pub mod replace;
pub mod restart;

pub use fencing::PodFencing;
pub use replace::PodReplaceOperator;
pub use restart::{ContainerRestartOperator, RestartHandler};

/// State shared by every action operator for one job and one pass.
#[derive(Clone, Copy)]
pub struct GenericOperator<'a> {
    pub store: &'a dyn ClusterStore,
    pub job: &'a OperationJob,
    pub namespace: &'a str,
}

impl<'a> GenericOperator<'a> {
    pub fn job_name(&self) -> String {
        self.job.name_any()
    }

    pub async fn get_pod(&self, name: &str) -> Result<Option<Pod>, ReconcileErr> {
        Ok(self.store.get_pod(self.namespace, name).await?)
    }
}

/// The closed set of actions an OperationJob can perform.
pub enum ActionOperator<'a> {
    Restart(ContainerRestartOperator<'a>),
    Replace(PodReplaceOperator<'a>),
}

impl<'a> ActionOperator<'a> {
    pub fn new(
        generic: GenericOperator<'a>,
        fencing: PodFencing,
    ) -> Result<Self, ReconcileErr> {
        match generic.job.spec.action {
            OpsAction::Restart => {
                let method = generic
                    .job
                    .annotations()
                    .get(ANNOTATION_RECREATE_METHOD)
                    .map(String::as_str);
                Ok(ActionOperator::Restart(ContainerRestartOperator::new(
                    generic,
                    RestartHandler::from_method(method),
                )))
            }
            OpsAction::Replace => {
                fencing.check_job_name(&generic.job_name())?;
                Ok(ActionOperator::Replace(PodReplaceOperator::new(
                    generic, fencing,
                )))
            }
            OpsAction::Unsupported => Err(ReconcileErr::UnsupportedAction(
                generic.job.spec.action.to_string(),
            )),
        }
    }

    pub async fn list_targets(&self) -> Result<Vec<OpsCandidate>, ReconcileErr> {
        match self {
            ActionOperator::Restart(op) => op.list_targets().await,
            ActionOperator::Replace(op) => op.list_targets().await,
        }
    }

    pub async fn operate_target(
        &self,
        candidate: &mut OpsCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileErr> {
        if candidate.is_ops_finished() {
            return Ok(());
        }
        match self {
            ActionOperator::Restart(op) => op.operate_target(candidate, now).await,
            ActionOperator::Replace(op) => op.operate_target(candidate, now).await,
        }
    }

    pub async fn fulfil_pod_ops_status(
        &self,
        candidate: &mut OpsCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileErr> {
        // no entry yet: the target was never operated on
        if candidate.pod_ops_status.is_none() || candidate.is_ops_finished() {
            return Ok(());
        }
        match self {
            ActionOperator::Restart(op) => {
                op.fulfil_pod_ops_status(candidate, now).await
            }
            ActionOperator::Replace(op) => {
                op.fulfil_pod_ops_status(candidate, now).await
            }
        }
    }

    pub async fn release_target(
        &self,
        candidate: &OpsCandidate,
    ) -> Result<Option<Duration>, ReconcileErr> {
        match self {
            ActionOperator::Restart(op) => op.release_target(candidate).await,
            ActionOperator::Replace(op) => op.release_target(candidate).await,
        }
    }
}

/// Pod is Ready when its `Ready` condition is `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}
