use chrono::{DateTime, Utc};

use super::candidate::OpsCandidate;
use super::lifecycle::calculate_progress;
use crate::crd::operation_job::{
    OperationJob, OperationJobStatus, OperationProgress, PodOpsStatus,
};

/// Force a running job to Failed. A job that already finished keeps its
/// outcome; `end_timestamp` is only written the first time.
pub fn mark_failed(job: &mut OperationJob, now: DateTime<Utc>) {
    let status = job.status_mut();
    if !status.progress.is_terminal() {
        status.progress = OperationProgress::Failed;
    }
    stamp_end(status, now);
}

fn stamp_end(status: &mut OperationJobStatus, now: DateTime<Utc>) {
    if status.progress.is_terminal() && status.end_timestamp.is_none() {
        status.end_timestamp = Some(now.to_rfc3339());
    }
}

/// Write candidate statuses back into the job and recompute its progress.
/// Entries are kept in target declaration order; candidates that were never
/// operated on (no status entry) leave no trace.
pub fn apply_candidates(
    job: &mut OperationJob,
    candidates: &[OpsCandidate],
    now: DateTime<Utc>,
) {
    let targets = job.spec.targets.clone();
    let generation = job.metadata.generation;
    let status = job.status_mut();

    let mut details: Vec<PodOpsStatus> = Vec::with_capacity(targets.len());
    for target in &targets {
        if details.iter().any(|d| d.pod_name == target.pod_name) {
            continue;
        }
        let fresh = candidates
            .iter()
            .find(|c| c.pod_name == target.pod_name)
            .and_then(|c| c.pod_ops_status.clone());
        let existing = status
            .target_details
            .iter()
            .find(|d| d.pod_name == target.pod_name)
            .cloned();
        if let Some(d) = fresh.or(existing) {
            details.push(d);
        }
    }
    status.target_details = details;
    status.progress =
        calculate_progress(&targets, &status.target_details, status.progress);
    if status.progress != OperationProgress::Pending
        && status.start_timestamp.is_none()
    {
        status.start_timestamp = status
            .target_details
            .iter()
            .filter_map(|d| d.start_timestamp.clone())
            .min()
            .or_else(|| Some(now.to_rfc3339()));
    }
    status.observed_generation = generation;
    stamp_end(status, now);
}
