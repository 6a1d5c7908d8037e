use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation selecting how containers are recreated for `Restart` jobs.
pub const ANNOTATION_RECREATE_METHOD: &str =
    "operationjob.kusionstack.io/recreate-method";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.kusionstack.io",
    version = "v1alpha1",
    kind = "OperationJob",
    plural = "operationjobs",
    shortname = "oj",
    namespaced,
    status = "OperationJobStatus",
    printcolumn = r#"{"name":"Progress","type":"string","jsonPath":".status.progress"}"#,
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperationJobSpec {
    /// Operation applied to every target (Restart | Replace)
    pub action: OpsAction,
    /// Pods to operate on, in rollout declaration order
    #[serde(default)]
    pub targets: Vec<PodOpsTarget>,
    /// Number of leading targets (by rollout order) eligible in a pass.
    /// Unset means every target is eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    /// Seconds after creation before an unfinished job is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i32>,
    /// Seconds after the job finished before it is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum OpsAction {
    Restart,
    Replace,
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for OpsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpsAction::Restart => write!(f, "Restart"),
            OpsAction::Replace => write!(f, "Replace"),
            OpsAction::Unsupported => write!(f, "Unsupported"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodOpsTarget {
    pub pod_name: String,
    /// Containers to operate on; empty means every container of the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationJobStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub progress: OperationProgress,
    /// RFC3339 time the first target started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    /// RFC3339 time the job became terminal; written once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_details: Vec<PodOpsStatus>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq,
)]
#[serde(rename_all = "PascalCase")]
pub enum OperationProgress {
    #[default]
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl OperationProgress {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationProgress::Succeeded | OperationProgress::Failed)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodOpsStatus {
    pub pod_name: String,
    #[serde(default)]
    pub phase: TargetPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq,
)]
#[serde(rename_all = "PascalCase")]
pub enum TargetPhase {
    #[default]
    NotStarted,
    Processing,
    Completed,
    Failed,
}

impl TargetPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TargetPhase::Completed | TargetPhase::Failed)
    }

    /// Position along NotStarted -> Processing -> {Completed | Failed}.
    pub fn rank(self) -> u8 {
        match self {
            TargetPhase::NotStarted => 0,
            TargetPhase::Processing => 1,
            TargetPhase::Completed | TargetPhase::Failed => 2,
        }
    }
}

impl OperationJob {
    pub fn progress(&self) -> OperationProgress {
        self.status
            .as_ref()
            .map(|s| s.progress)
            .unwrap_or_default()
    }

    pub fn status_mut(&mut self) -> &mut OperationJobStatus {
        self.status.get_or_insert_with(OperationJobStatus::default)
    }

    pub fn target_status(&self, pod_name: &str) -> Option<&PodOpsStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.target_details.iter().find(|d| d.pod_name == pod_name))
    }
}
