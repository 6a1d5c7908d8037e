use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;

use crate::crd::operation_job::{PodOpsStatus, TargetPhase};

/// One target pod as seen during a single reconcile pass.
#[derive(Clone, Debug, Default)]
pub struct OpsCandidate {
    /// Live pod; `None` when the pod is absent from the cluster
    pub pod: Option<Pod>,
    pub pod_name: String,
    pub containers: Vec<String>,
    /// Copy of the job's status entry for this pod; `None` means not started
    pub pod_ops_status: Option<PodOpsStatus>,

    pub replace_triggered: bool,
    pub replace_new_pod: Option<Pod>,
}

impl OpsCandidate {
    pub fn new(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            ..Default::default()
        }
    }

    pub fn phase(&self) -> Option<TargetPhase> {
        self.pod_ops_status.as_ref().map(|s| s.phase)
    }

    pub fn is_ops_not_started(&self) -> bool {
        matches!(self.phase(), None | Some(TargetPhase::NotStarted))
    }

    pub fn is_ops_finished(&self) -> bool {
        self.phase().map(TargetPhase::is_terminal).unwrap_or(false)
    }

    /// Returns the status entry, creating a `NotStarted` one on first use.
    pub fn ensure_status(&mut self) -> &mut PodOpsStatus {
        let pod_name = self.pod_name.clone();
        self.pod_ops_status.get_or_insert_with(|| PodOpsStatus {
            pod_name,
            ..Default::default()
        })
    }

    /// Move the target forward to `next`. Backward moves and moves out of a
    /// terminal phase are ignored. Returns whether the phase changed.
    pub fn advance_phase(
        &mut self,
        next: TargetPhase,
        now: DateTime<Utc>,
        message: Option<String>,
    ) -> bool {
        let status = self.ensure_status();
        if status.phase.is_terminal() || next.rank() <= status.phase.rank() {
            return false;
        }
        let ts = now.to_rfc3339();
        if status.start_timestamp.is_none() {
            status.start_timestamp = Some(ts.clone());
        }
        if next.is_terminal() {
            status.end_timestamp = Some(ts);
        }
        status.phase = next;
        if message.is_some() {
            status.message = message;
        }
        true
    }
}
