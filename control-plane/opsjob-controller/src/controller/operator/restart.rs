use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::Resource;
use tracing::{debug, info, instrument, warn};

use super::GenericOperator;
use crate::controller::ReconcileErr;
use crate::controller::candidate::OpsCandidate;
use crate::controller::store::StoreError;
use crate::crd::container_recreate_request::{
    ContainerRecreateRequest, ContainerRecreateRequestContainer,
    ContainerRecreateRequestPhase, ContainerRecreateRequestSpec,
};
use crate::crd::operation_job::{OperationProgress, TargetPhase};

pub const KRUISE_CONTAINER_RECREATE_REQUEST: &str =
    "kruise-containerrecreaterequest";

/// Re-check delay while a deleted helper resource disappears.
pub const RELEASE_RECHECK: Duration = Duration::from_secs(1);

/// Helper resource name for a (job, pod) pair.
pub fn recreate_request_name(job_name: &str, pod_name: &str) -> String {
    format!("{}-{}", job_name, pod_name)
}

/// How containers are actually recreated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartHandler {
    /// One OpenKruise ContainerRecreateRequest per pod.
    ContainerRecreateRequest,
}

impl RestartHandler {
    /// Resolve the recreate method annotation, falling back to the default
    /// handler when it is missing or unknown.
    pub fn from_method(method: Option<&str>) -> Self {
        match method {
            None | Some("") | Some(KRUISE_CONTAINER_RECREATE_REQUEST) => {
                RestartHandler::ContainerRecreateRequest
            }
            Some(other) => {
                debug!(method = %other, "unknown recreate method; using default");
                RestartHandler::ContainerRecreateRequest
            }
        }
    }

    pub async fn do_restart_containers(
        &self,
        generic: &GenericOperator<'_>,
        candidate: &OpsCandidate,
        containers: &[String],
    ) -> Result<(), ReconcileErr> {
        match self {
            RestartHandler::ContainerRecreateRequest => {
                let ns = generic.namespace;
                let name =
                    recreate_request_name(&generic.job_name(), &candidate.pod_name);
                if generic.store.get_recreate_request(ns, &name).await?.is_some() {
                    return Ok(());
                }
                let crr = build_recreate_request(generic, candidate, containers);
                match generic.store.create_recreate_request(ns, &crr).await {
                    Ok(()) => {
                        info!(%ns, crr = %name, pod = %candidate.pod_name, "created ContainerRecreateRequest");
                        Ok(())
                    }
                    Err(StoreError::AlreadyExists) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    pub async fn get_restart_progress(
        &self,
        generic: &GenericOperator<'_>,
        candidate: &OpsCandidate,
    ) -> OperationProgress {
        match self {
            RestartHandler::ContainerRecreateRequest => {
                let name =
                    recreate_request_name(&generic.job_name(), &candidate.pod_name);
                match generic
                    .store
                    .get_recreate_request(generic.namespace, &name)
                    .await
                {
                    Ok(None) => OperationProgress::Pending,
                    Ok(Some(crr)) => match crr.phase() {
                        Some(ContainerRecreateRequestPhase::Completed)
                        | Some(ContainerRecreateRequestPhase::Succeeded) => {
                            OperationProgress::Succeeded
                        }
                        Some(ContainerRecreateRequestPhase::Failed) => {
                            OperationProgress::Failed
                        }
                        _ => OperationProgress::Processing,
                    },
                    Err(e) => {
                        warn!(crr = %name, error = %e, "cannot read ContainerRecreateRequest; treating as failed");
                        OperationProgress::Failed
                    }
                }
            }
        }
    }

    /// Delete the helper resource. Returns whether a delete was issued.
    pub async fn release_pod(
        &self,
        generic: &GenericOperator<'_>,
        candidate: &OpsCandidate,
    ) -> Result<bool, ReconcileErr> {
        match self {
            RestartHandler::ContainerRecreateRequest => {
                let ns = generic.namespace;
                let name =
                    recreate_request_name(&generic.job_name(), &candidate.pod_name);
                if generic.store.get_recreate_request(ns, &name).await?.is_none() {
                    return Ok(false);
                }
                match generic.store.delete_recreate_request(ns, &name).await {
                    Ok(()) => {
                        info!(%ns, crr = %name, "deleted ContainerRecreateRequest");
                        Ok(true)
                    }
                    Err(StoreError::NotFound) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

fn build_recreate_request(
    generic: &GenericOperator<'_>,
    candidate: &OpsCandidate,
    containers: &[String],
) -> ContainerRecreateRequest {
    let name = recreate_request_name(&generic.job_name(), &candidate.pod_name);
    let mut crr = ContainerRecreateRequest::new(
        &name,
        ContainerRecreateRequestSpec {
            pod_name: candidate.pod_name.clone(),
            containers: containers
                .iter()
                .map(|c| ContainerRecreateRequestContainer { name: c.clone() })
                .collect(),
            ..Default::default()
        },
    );
    crr.metadata.namespace = Some(generic.namespace.to_string());
    crr.metadata.owner_references =
        generic.job.controller_owner_ref(&()).map(|r| vec![r]);
    crr
}

pub struct ContainerRestartOperator<'a> {
    generic: GenericOperator<'a>,
    handler: RestartHandler,
}

impl<'a> ContainerRestartOperator<'a> {
    pub fn new(generic: GenericOperator<'a>, handler: RestartHandler) -> Self {
        Self { generic, handler }
    }

    #[instrument(level = "debug", skip_all, fields(job = %self.generic.job_name()))]
    pub async fn list_targets(&self) -> Result<Vec<OpsCandidate>, ReconcileErr> {
        let mut candidates = Vec::with_capacity(self.generic.job.spec.targets.len());
        for target in &self.generic.job.spec.targets {
            let pod = self.generic.get_pod(&target.pod_name).await?;
            let containers = if target.containers.is_empty() {
                pod.as_ref()
                    .and_then(|p| p.spec.as_ref())
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default()
            } else {
                target.containers.clone()
            };
            candidates.push(OpsCandidate {
                pod,
                pod_name: target.pod_name.clone(),
                containers,
                pod_ops_status: self
                    .generic
                    .job
                    .target_status(&target.pod_name)
                    .cloned(),
                ..Default::default()
            });
        }
        Ok(candidates)
    }

    pub async fn operate_target(
        &self,
        candidate: &mut OpsCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileErr> {
        if candidate.pod.is_none() {
            if candidate.is_ops_not_started() {
                candidate.advance_phase(
                    TargetPhase::Failed,
                    now,
                    Some("target pod not found".into()),
                );
            }
            return Ok(());
        }
        candidate.ensure_status();
        let containers = candidate.containers.clone();
        self.handler
            .do_restart_containers(&self.generic, candidate, &containers)
            .await
    }

    pub async fn fulfil_pod_ops_status(
        &self,
        candidate: &mut OpsCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileErr> {
        let progress = self
            .handler
            .get_restart_progress(&self.generic, candidate)
            .await;
        let (phase, message) = match progress {
            OperationProgress::Pending => return Ok(()),
            OperationProgress::Processing => (TargetPhase::Processing, None),
            OperationProgress::Succeeded => (TargetPhase::Completed, None),
            OperationProgress::Failed => (
                TargetPhase::Failed,
                Some("container recreate failed".to_string()),
            ),
        };
        candidate.advance_phase(phase, now, message);
        Ok(())
    }

    pub async fn release_target(
        &self,
        candidate: &OpsCandidate,
    ) -> Result<Option<Duration>, ReconcileErr> {
        let deleted = self.handler.release_pod(&self.generic, candidate).await?;
        Ok(deleted.then_some(RELEASE_RECHECK))
    }
}
