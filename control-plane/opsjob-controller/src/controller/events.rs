use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

use crate::crd::operation_job::OperationJob;

pub const REASON_TIMEOUT: &str = "Timeout";
pub const REASON_TTL: &str = "TTL";
pub const REASON_UNSUPPORTED_ACTION: &str = "UnsupportedAction";
pub const REASON_INVALID_JOB: &str = "InvalidJob";
pub const REASON_RELEASED: &str = "Released";
pub const REASON_FINISHED: &str = "Finished";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Append-only event sink keyed to a job. Delivery is best effort and never
/// fails a reconcile.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        job: &OperationJob,
        severity: Severity,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

pub struct RecorderSink {
    recorder: Recorder,
}

impl RecorderSink {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

#[async_trait::async_trait]
impl EventSink for RecorderSink {
    async fn publish(
        &self,
        job: &OperationJob,
        severity: Severity,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let type_ = match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        };
        if let Err(e) = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &job.object_ref(&()),
            )
            .await
        {
            debug!(error = %e, %reason, "event publish failed");
        }
    }
}
