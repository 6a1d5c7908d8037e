mod common;

use std::time::Duration;

use common::*;
use opsjob_controller::controller::ReconcileErr;
use opsjob_controller::controller::events::{
    REASON_RELEASED, REASON_UNSUPPORTED_ACTION, Severity,
};
use opsjob_controller::controller::reconcile::FINALIZER;
use opsjob_controller::controller::store::ClusterStore;
use opsjob_controller::crd::operation_job::{OperationProgress, OpsAction};

async fn running_job(h: &Harness, pods: &[&str]) {
    for p in pods {
        h.store.insert_pod(new_pod(p, &["app"])).await;
    }
    h.store
        .insert_job(new_job("oj", OpsAction::Restart, pods))
        .await;
    h.reconciler.reconcile_job(NS, "oj", t0()).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn deletion_releases_before_dropping_finalizer() {
    let h = Harness::new();
    running_job(&h, &["p1", "p2"]).await;
    assert_eq!(h.store.crr_names().await.len(), 2);

    h.store.delete_job(NS, "oj").await.unwrap();
    let requeue = h
        .reconciler
        .reconcile_job(NS, "oj", t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(requeue, Some(Duration::from_secs(1)));
    assert!(h.store.crr_names().await.is_empty());
    let job = h.store.job("oj").await.expect("held by finalizer");
    assert!(job.metadata.finalizers.unwrap().contains(&FINALIZER.to_string()));
    assert_eq!(job.status.unwrap().progress, OperationProgress::Failed);

    let requeue = h
        .reconciler
        .reconcile_job(NS, "oj", t0() + secs(2))
        .await
        .unwrap();
    assert_eq!(requeue, None);
    assert!(h.store.job("oj").await.is_none());
    assert!(h.events.reasons().await.contains(&REASON_RELEASED.to_string()));
}

#[test_log::test(tokio::test)]
async fn release_is_idempotent() {
    let h = Harness::new();
    running_job(&h, &["p1"]).await;
    let mut job = h.store.job("oj").await.unwrap();

    let first = h
        .reconciler
        .release_targets_for_deletion(NS, &mut job, t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(first, Some(Duration::from_secs(1)));
    let deletes = h.store.with_state(|s| s.crr_deletes).await;

    let second = h
        .reconciler
        .release_targets_for_deletion(NS, &mut job, t0() + secs(2))
        .await
        .unwrap();
    assert_eq!(second, None);
    assert_eq!(h.store.with_state(|s| s.crr_deletes).await, deletes);
    assert_eq!(
        job.status.unwrap().end_timestamp,
        Some((t0() + secs(1)).to_rfc3339())
    );
}

#[test_log::test(tokio::test)]
async fn release_stops_at_first_error() {
    let h = Harness::new();
    running_job(&h, &["p1", "p2"]).await;
    h.store
        .with_state(|s| s.fail_crr_delete = Some("oj-p1".into()))
        .await;
    let mut job = h.store.job("oj").await.unwrap();

    let res = h
        .reconciler
        .release_targets_for_deletion(NS, &mut job, t0() + secs(1))
        .await;
    assert!(matches!(res, Err(ReconcileErr::Store(_))));
    // p2 was never reached
    assert_eq!(
        h.store.crr_names().await,
        vec!["oj-p1".to_string(), "oj-p2".to_string()]
    );

    h.store.with_state(|s| s.fail_crr_delete = None).await;
    let res = h
        .reconciler
        .release_targets_for_deletion(NS, &mut job, t0() + secs(2))
        .await
        .unwrap();
    assert_eq!(res, Some(Duration::from_secs(1)));
    assert!(h.store.crr_names().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn unsupported_action_fails_permanently() {
    let h = Harness::new();
    h.store.insert_pod(new_pod("p1", &["app"])).await;
    h.store
        .insert_job(new_job("oj", OpsAction::Unsupported, &["p1"]))
        .await;

    let err = h
        .reconciler
        .reconcile_job(NS, "oj", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileErr::UnsupportedAction(_)));
    assert!(err.is_permanent());

    let events = h.events.events.lock().await.clone();
    let warning = events
        .iter()
        .find(|e| e.reason == REASON_UNSUPPORTED_ACTION)
        .expect("warning emitted");
    assert_eq!(warning.severity, Severity::Warning);
    assert!(warning.note.as_deref().unwrap_or_default().contains("unsupported"));

    let status = h.store.job("oj").await.unwrap().status.unwrap();
    assert_eq!(status.progress, OperationProgress::Failed);
    assert!(h.store.crr_names().await.is_empty());

    // deletion is never blocked by the bad action
    h.store.delete_job(NS, "oj").await.unwrap();
    let requeue = h
        .reconciler
        .reconcile_job(NS, "oj", t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(requeue, None);
    assert!(h.store.job("oj").await.is_none());
}

#[test_log::test(tokio::test)]
async fn store_errors_are_retryable() {
    let h = Harness::new();
    running_job(&h, &["p1"]).await;
    h.store.with_state(|s| s.fail_crr_get = true).await;

    let err = h
        .reconciler
        .reconcile_job(NS, "oj", t0() + secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileErr::Store(_)));
    assert!(!err.is_permanent());
}
