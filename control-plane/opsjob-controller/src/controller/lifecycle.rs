use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crd::operation_job::{
    OperationJob, OperationProgress, PodOpsStatus, PodOpsTarget, TargetPhase,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Nothing expired; re-check after the given delay if any.
    Wait(Option<Duration>),
    /// Active deadline passed while the job was still running.
    DeadlineExceeded,
    /// The finished job outlived its TTL and should be deleted.
    TtlExpired,
}

/// Evaluate the active deadline (running jobs) or the TTL (finished jobs)
/// against `now`.
pub fn ensure_active_deadline_or_ttl(
    job: &OperationJob,
    now: DateTime<Utc>,
) -> LifecycleDecision {
    if !job.progress().is_terminal() {
        if let Some(deadline) = job.spec.active_deadline_seconds {
            let created = job
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .unwrap_or(now);
            return match time_left(deadline, created, now) {
                Some(left) => LifecycleDecision::Wait(Some(left)),
                None => LifecycleDecision::DeadlineExceeded,
            };
        }
    } else if let Some(ttl) = job.spec.ttl_seconds_after_finished {
        let ended = job
            .status
            .as_ref()
            .and_then(|s| s.end_timestamp.as_deref())
            .and_then(parse_rfc3339)
            .unwrap_or(now);
        return match time_left(ttl, ended, now) {
            Some(left) => LifecycleDecision::Wait(Some(left)),
            None => LifecycleDecision::TtlExpired,
        };
    }
    LifecycleDecision::Wait(None)
}

fn time_left(
    secs: i32,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let left = chrono::Duration::seconds(i64::from(secs.max(0))) - (now - since);
    if left > chrono::Duration::zero() {
        left.to_std().ok()
    } else {
        None
    }
}

pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Fold per-target phases into the job progress. Terminal progress is sticky.
pub fn calculate_progress(
    targets: &[PodOpsTarget],
    details: &[PodOpsStatus],
    current: OperationProgress,
) -> OperationProgress {
    if current.is_terminal() {
        return current;
    }
    let mut all_terminal = true;
    let mut any_started = false;
    let mut any_failed = false;
    for target in targets {
        let phase = details
            .iter()
            .find(|d| d.pod_name == target.pod_name)
            .map(|d| d.phase)
            .unwrap_or_default();
        match phase {
            TargetPhase::NotStarted => all_terminal = false,
            TargetPhase::Processing => {
                all_terminal = false;
                any_started = true;
            }
            TargetPhase::Completed => any_started = true,
            TargetPhase::Failed => {
                any_started = true;
                any_failed = true;
            }
        }
    }
    if all_terminal {
        if any_failed {
            OperationProgress::Failed
        } else {
            OperationProgress::Succeeded
        }
    } else if any_started {
        OperationProgress::Processing
    } else {
        OperationProgress::Pending
    }
}

/// Smaller of two optional delays; `None` means "no request".
pub fn min_requeue(
    a: Option<Duration>,
    b: Option<Duration>,
) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
