use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{info, instrument};

use super::{GenericOperator, PodFencing, is_pod_ready};
use crate::controller::ReconcileErr;
use crate::controller::candidate::OpsCandidate;
use crate::controller::store::StoreError;
use crate::crd::operation_job::TargetPhase;

/// Asks the owning workload to replace the pod.
pub const LABEL_REPLACE_INDICATE: &str = "podopslifecycle.kusionstack.io/to-replace";
/// Set by the owning workload on the replacement pod, pointing at the origin.
pub const LABEL_REPLACE_PAIR_ORIGIN: &str =
    "collaset.kusionstack.io/replace-pair-origin-name";
pub const OPERATION_TYPE_REPLACE: &str = "replace";

// Replacement pods are created by the workload controller that owns the
// target; this operator only marks the origin pod and watches the outcome.
pub struct PodReplaceOperator<'a> {
    generic: GenericOperator<'a>,
    fencing: PodFencing,
}

impl<'a> PodReplaceOperator<'a> {
    pub fn new(generic: GenericOperator<'a>, fencing: PodFencing) -> Self {
        Self { generic, fencing }
    }

    #[instrument(level = "debug", skip_all, fields(job = %self.generic.job_name()))]
    pub async fn list_targets(&self) -> Result<Vec<OpsCandidate>, ReconcileErr> {
        let ns = self.generic.namespace;
        let mut candidates = Vec::with_capacity(self.generic.job.spec.targets.len());
        for target in &self.generic.job.spec.targets {
            let pod = self.generic.get_pod(&target.pod_name).await?;
            let replace_triggered = pod
                .as_ref()
                .map(|p| p.labels().contains_key(LABEL_REPLACE_INDICATE))
                .unwrap_or(false);
            let selector =
                format!("{}={}", LABEL_REPLACE_PAIR_ORIGIN, target.pod_name);
            let replace_new_pod = self
                .generic
                .store
                .list_pods(ns, &selector)
                .await?
                .into_iter()
                .next();
            candidates.push(OpsCandidate {
                pod,
                pod_name: target.pod_name.clone(),
                containers: vec![],
                pod_ops_status: self
                    .generic
                    .job
                    .target_status(&target.pod_name)
                    .cloned(),
                replace_triggered,
                replace_new_pod,
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
            if candidate.replace_new_pod.is_some() {
                // replaced before its status entry was saved; track the new pod
                candidate.ensure_status();
            } else if candidate.is_ops_not_started() {
                candidate.advance_phase(
                    TargetPhase::Failed,
                    now,
                    Some("target pod not found".into()),
                );
            }
            return Ok(());
        }
        candidate.ensure_status();
        if candidate.replace_triggered {
            return Ok(());
        }

        let ns = self.generic.namespace;
        let job_name = self.generic.job_name();
        let marked = async {
            self.fencing
                .fulfil(
                    self.generic.store,
                    ns,
                    &candidate.pod_name,
                    &job_name,
                    OPERATION_TYPE_REPLACE,
                )
                .await?;
            let labels = BTreeMap::from([(
                LABEL_REPLACE_INDICATE.to_string(),
                Some(now.timestamp().to_string()),
            )]);
            self.generic
                .store
                .patch_pod_labels(ns, &candidate.pod_name, &labels)
                .await?;
            Ok::<(), ReconcileErr>(())
        }
        .await;
        match marked {
            Ok(()) => {
                info!(%ns, pod = %candidate.pod_name, "marked pod to replace");
                candidate.replace_triggered = true;
                Ok(())
            }
            // pod vanished after listing; the next pass sees it as absent
            Err(ReconcileErr::Store(StoreError::NotFound)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn fulfil_pod_ops_status(
        &self,
        candidate: &mut OpsCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileErr> {
        let phase = match &candidate.replace_new_pod {
            Some(new_pod) if candidate.pod.is_none() && is_pod_ready(new_pod) => {
                TargetPhase::Completed
            }
            Some(_) => TargetPhase::Processing,
            None if candidate.replace_triggered => TargetPhase::Processing,
            None => return Ok(()),
        };
        candidate.advance_phase(phase, now, None);
        Ok(())
    }

    pub async fn release_target(
        &self,
        candidate: &OpsCandidate,
    ) -> Result<Option<Duration>, ReconcileErr> {
        if candidate.pod.is_none() {
            return Ok(None);
        }
        let ns = self.generic.namespace;
        self.fencing
            .release(
                self.generic.store,
                ns,
                &candidate.pod_name,
                &self.generic.job_name(),
            )
            .await?;
        if candidate.replace_triggered && !candidate.is_ops_finished() {
            let labels =
                BTreeMap::from([(LABEL_REPLACE_INDICATE.to_string(), None)]);
            match self
                .generic
                .store
                .patch_pod_labels(ns, &candidate.pod_name, &labels)
                .await
            {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}
