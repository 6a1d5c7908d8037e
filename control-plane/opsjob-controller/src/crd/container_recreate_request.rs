use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Client-side view of OpenKruise's ContainerRecreateRequest. The CRD itself is
// installed by Kruise; only the fields this controller reads or writes are
// modelled here.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "apps.kruise.io",
    version = "v1alpha1",
    kind = "ContainerRecreateRequest",
    plural = "containerrecreaterequests",
    namespaced,
    status = "ContainerRecreateRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecreateRequestSpec {
    pub pod_name: String,
    pub containers: Vec<ContainerRecreateRequestContainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecreateRequestContainer {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecreateRequestStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ContainerRecreateRequestPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ContainerRecreateRequestPhase {
    Pending,
    Recreating,
    Succeeded,
    Failed,
    Completed,
    #[serde(other)]
    Unknown,
}

impl ContainerRecreateRequest {
    pub fn phase(&self) -> Option<ContainerRecreateRequestPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}
