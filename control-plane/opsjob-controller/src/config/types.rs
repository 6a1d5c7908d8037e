use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OpsJobConfig {
    /// Restrict the controller to one namespace; unset watches all namespaces.
    /// Env: OPSJOB_NAMESPACE
    #[envconfig(from = "OPSJOB_NAMESPACE")]
    pub namespace: Option<String>,

    /// Reporter name on emitted Events
    #[envconfig(from = "OPSJOB_CONTROLLER_NAME", default = "operationjob-controller")]
    pub controller_name: String,

    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Poll delay while any target is still processing.
    /// Env: OPSJOB_PROCESSING_REQUEUE_SECS
    #[envconfig(from = "OPSJOB_PROCESSING_REQUEUE_SECS", default = "5")]
    pub processing_requeue_secs: u64,

    /// Requeue delay after a transient reconcile error.
    /// Env: OPSJOB_ERROR_REQUEUE_SECS
    #[envconfig(from = "OPSJOB_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,

    #[envconfig(nested)]
    pub features: FeaturesConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct FeaturesConfig {
    /// Hold pods through the pod-ops lifecycle labels while they are replaced.
    /// Env: OPSJOB_FEATURES_POD_OPS_LIFECYCLE
    #[envconfig(from = "OPSJOB_FEATURES_POD_OPS_LIFECYCLE", default = "true")]
    pub pod_ops_lifecycle: bool,
}

impl OpsJobConfig {
    pub fn processing_requeue(&self) -> Duration {
        Duration::from_secs(self.processing_requeue_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
