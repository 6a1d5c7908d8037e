use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use kube::{
    Api, Client, ResourceExt,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        watcher::Config,
    },
};
use tracing::{error, info, instrument, warn};

use crate::config::OpsJobConfig;
use crate::crd::container_recreate_request::ContainerRecreateRequest;
use crate::crd::operation_job::OperationJob;

pub mod candidate;
pub mod events;
pub mod lifecycle;
pub mod operator;
pub mod reconcile;
pub mod rollout;
pub mod status;
pub mod store;


pub use reconcile::{EngineSettings, Reconciler};

use events::RecorderSink;
use store::{KubeStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("unsupported operation type {0}")]
    UnsupportedAction(String),
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileErr {
    /// Configuration errors need the owner to fix the job; retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ReconcileErr::UnsupportedAction(_) | ReconcileErr::InvalidJob(_)
        )
    }
}

pub struct ControllerContext {
    pub reconciler: Reconciler,
    pub error_requeue: Duration,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: &OpsJobConfig) -> Self {
        let reporter = Reporter {
            controller: cfg.controller_name.clone(),
            instance: std::env::var("POD_NAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        let reconciler = Reconciler::new(
            Arc::new(KubeStore::new(client)),
            Arc::new(RecorderSink::new(recorder)),
            EngineSettings {
                processing_requeue: cfg.processing_requeue(),
                pod_ops_lifecycle: cfg.features.pod_ops_lifecycle,
            },
        );
        Self {
            reconciler,
            error_requeue: cfg.error_requeue(),
        }
    }
}

pub async fn run_controller(client: Client, cfg: OpsJobConfig) -> anyhow::Result<()> {
    let (jobs, crrs): (Api<OperationJob>, Api<ContainerRecreateRequest>) =
        match cfg.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
    let ctx = Arc::new(ControllerContext::new(client, &cfg));
    info!(namespace = ?cfg.namespace, "starting OperationJob controller");

    Controller::new(jobs, Config::default())
        .owns(crrs, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(job = %obj_ref.name, "reconciled: requeue={:?}", action)
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<OperationJob>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    let requeue = ctx.reconciler.reconcile_job(&ns, &name, Utc::now()).await?;
    Ok(requeue
        .map(Action::requeue)
        .unwrap_or_else(Action::await_change))
}

pub fn error_policy(
    obj: Arc<OperationJob>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    if error.is_permanent() {
        warn!(name = %obj.name_any(), %error, "not retrying until the job changes");
        Action::await_change()
    } else {
        Action::requeue(ctx.error_requeue)
    }
}
