use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, instrument, trace, warn};

use super::ReconcileErr;
use super::candidate::OpsCandidate;
use super::events::{
    EventSink, REASON_FINISHED, REASON_RELEASED, REASON_TIMEOUT, REASON_TTL,
    REASON_INVALID_JOB, REASON_UNSUPPORTED_ACTION, Severity,
};
use super::lifecycle::{
    LifecycleDecision, ensure_active_deadline_or_ttl, min_requeue,
};
use super::operator::{ActionOperator, GenericOperator, PodFencing};
use super::rollout::decide_candidates_by_partition;
use super::status::{apply_candidates, mark_failed};
use super::store::{ClusterStore, StoreError};
use crate::crd::operation_job::{
    OperationJob, OperationJobStatus, OperationProgress, TargetPhase,
};

pub const FINALIZER: &str = "apps.kusionstack.io/operationjob-protection";

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Poll delay while any target is processing
    pub processing_requeue: Duration,
    /// PodOpsLifecycle feature gate; off disables pod fencing
    pub pod_ops_lifecycle: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            processing_requeue: Duration::from_secs(5),
            pod_ops_lifecycle: true,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    events: Arc<dyn EventSink>,
    settings: EngineSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        events: Arc<dyn EventSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    fn new_operator<'a>(
        &'a self,
        job: &'a OperationJob,
        ns: &'a str,
    ) -> Result<ActionOperator<'a>, ReconcileErr> {
        ActionOperator::new(
            GenericOperator {
                store: self.store.as_ref(),
                job,
                namespace: ns,
            },
            PodFencing::from_flag(self.settings.pod_ops_lifecycle),
        )
    }

    /// One reconcile pass for the job `ns/name` at wall-clock `now`.
    /// Returns the delay after which the job should be looked at again, if any.
    #[instrument(skip_all, fields(%ns, %name))]
    pub async fn reconcile_job(
        &self,
        ns: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, ReconcileErr> {
        let Some(mut job) = self.store.get_job(ns, name).await? else {
            debug!("job no longer exists");
            return Ok(None);
        };

        if job.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(ns, name, job, now).await;
        }

        if !has_finalizer(&job) {
            let mut finals = job.finalizers().to_vec();
            finals.push(FINALIZER.to_string());
            info!("adding finalizer");
            match self.store.patch_job_finalizers(ns, name, &finals).await {
                Ok(()) => job.metadata.finalizers = Some(finals),
                Err(StoreError::NotFound) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        let original = job.status.clone();
        let mut requeue_after = match ensure_active_deadline_or_ttl(&job, now) {
            LifecycleDecision::TtlExpired => {
                info!("should be deleted but still alive");
                self.events
                    .publish(
                        &job,
                        Severity::Normal,
                        REASON_TTL,
                        "Delete",
                        Some("Try to delete operationJob for TTL...".into()),
                    )
                    .await;
                return match self.store.delete_job(ns, name).await {
                    Ok(()) | Err(StoreError::NotFound) => Ok(None),
                    Err(e) => Err(e.into()),
                };
            }
            LifecycleDecision::DeadlineExceeded => {
                info!("should end but still processing");
                self.events
                    .publish(
                        &job,
                        Severity::Normal,
                        REASON_TIMEOUT,
                        "Fail",
                        Some("Try to fail operationJob for timeout...".into()),
                    )
                    .await;
                mark_failed(&mut job, now);
                let released =
                    self.release_targets_for_deletion(ns, &mut job, now).await;
                self.persist_status(ns, name, original.as_ref(), &job).await?;
                return released;
            }
            LifecycleDecision::Wait(d) => d,
        };

        if let Some(err) = self.new_operator(&job, ns).err() {
            warn!(error = %err, "cannot operate job");
            let reason = match &err {
                ReconcileErr::UnsupportedAction(_) => REASON_UNSUPPORTED_ACTION,
                _ => REASON_INVALID_JOB,
            };
            self.events
                .publish(
                    &job,
                    Severity::Warning,
                    reason,
                    "Reconcile",
                    Some(err.to_string()),
                )
                .await;
            mark_failed(&mut job, now);
            self.persist_status(ns, name, original.as_ref(), &job).await?;
            return Err(err);
        }

        if !job.progress().is_terminal() {
            let candidates = {
                let operator = self.new_operator(&job, ns)?;
                let mut candidates = operator.list_targets().await?;
                let selected =
                    decide_candidates_by_partition(job.spec.partition, &candidates);
                debug!(
                    total = candidates.len(),
                    selected = selected.len(),
                    "operating candidates"
                );
                for idx in selected {
                    operator.operate_target(&mut candidates[idx], now).await?;
                }
                for candidate in candidates.iter_mut() {
                    operator.fulfil_pod_ops_status(candidate, now).await?;
                }
                candidates
            };
            apply_candidates(&mut job, &candidates, now);

            if candidates
                .iter()
                .any(|c| c.phase() == Some(TargetPhase::Processing))
            {
                requeue_after =
                    min_requeue(requeue_after, Some(self.settings.processing_requeue));
            }

            if job.progress().is_terminal() {
                info!(progress = ?job.progress(), "job finished");
                self.events
                    .publish(
                        &job,
                        Severity::Normal,
                        REASON_FINISHED,
                        "Finish",
                        Some(format!("operationJob {:?}", job.progress())),
                    )
                    .await;
                // the deadline no longer applies; the TTL clock starts now
                requeue_after = match ensure_active_deadline_or_ttl(&job, now) {
                    LifecycleDecision::Wait(d) => d,
                    _ => Some(Duration::ZERO),
                };
            }
        }

        if job.progress() == OperationProgress::Failed {
            let released = self.release_targets_for_deletion(ns, &mut job, now).await;
            match released {
                Ok(d) => requeue_after = min_requeue(requeue_after, d),
                Err(e) => {
                    self.persist_status(ns, name, original.as_ref(), &job).await?;
                    return Err(e);
                }
            }
        }

        self.persist_status(ns, name, original.as_ref(), &job).await?;
        Ok(requeue_after)
    }

    /// Fail the job if still running and release every target. Stops at the
    /// first release error; otherwise returns the smallest delay any release
    /// asked for.
    pub async fn release_targets_for_deletion(
        &self,
        ns: &str,
        job: &mut OperationJob,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, ReconcileErr> {
        mark_failed(job, now);
        let job: &OperationJob = job;
        let operator = match self.new_operator(job, ns) {
            Ok(operator) => operator,
            // a job that cannot be operated never touched its targets
            Err(e) if e.is_permanent() => return Ok(None),
            Err(e) => return Err(e),
        };
        let candidates = operator.list_targets().await?;
        let count = candidates.len();

        let operator = &operator;
        let requeue_after = release_in_order(candidates, |candidate| async move {
            operator.release_target(&candidate).await
        })
        .await?;
        trace!(count, ?requeue_after, "released targets");
        Ok(requeue_after)
    }

    async fn handle_deletion(
        &self,
        ns: &str,
        name: &str,
        mut job: OperationJob,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, ReconcileErr> {
        if !has_finalizer(&job) {
            return Ok(None);
        }
        info!("deletion timestamp detected; releasing targets");
        let original = job.status.clone();
        let released = self.release_targets_for_deletion(ns, &mut job, now).await;
        self.persist_status(ns, name, original.as_ref(), &job).await?;
        let requeue_after = released?;
        if requeue_after.is_some() {
            debug!(?requeue_after, "waiting for targets to be released");
            return Ok(requeue_after);
        }

        self.events
            .publish(
                &job,
                Severity::Normal,
                REASON_RELEASED,
                "Release",
                Some("All targets released".into()),
            )
            .await;
        let finals: Vec<String> = job
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        info!("removing finalizer");
        match self.store.patch_job_finalizers(ns, name, &finals).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_status(
        &self,
        ns: &str,
        name: &str,
        original: Option<&OperationJobStatus>,
        job: &OperationJob,
    ) -> Result<(), ReconcileErr> {
        let Some(status) = job.status.as_ref() else {
            return Ok(());
        };
        if original == Some(status) {
            trace!("status unchanged; skipping patch");
            return Ok(());
        }
        match self.store.patch_job_status(ns, name, status).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn has_finalizer(job: &OperationJob) -> bool {
    job.finalizers().iter().any(|f| f == FINALIZER)
}

/// Release candidates in declaration order, keeping the smallest requested
/// delay. The first error stops the walk; later candidates are untouched.
pub(crate) async fn release_in_order<F, Fut>(
    candidates: Vec<OpsCandidate>,
    mut release: F,
) -> Result<Option<Duration>, ReconcileErr>
where
    F: FnMut(OpsCandidate) -> Fut,
    Fut: Future<Output = Result<Option<Duration>, ReconcileErr>>,
{
    let mut requeue_after = None;
    for candidate in candidates {
        let delay = release(candidate).await?;
        requeue_after = min_requeue(requeue_after, delay);
    }
    Ok(requeue_after)
}
