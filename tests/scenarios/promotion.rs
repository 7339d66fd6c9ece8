//! Promotion gating: validation, approval, abort and admission

use crate::helpers::*;
use shipwright::core::error::PipelineError;
use shipwright::core::{DeploymentStatus, Environment, PipelineStage, Version};
use std::sync::Arc;

const V1_1: Version = Version::new(1, 1, 0);

#[tokio::test]
async fn test_promotion_requires_succeeded_test_run() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .promote(Environment::Production, V1_1, false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::PromotionNotValidated(v) if v == V1_1));
    assert!(harness
        .orchestrator
        .history(Some(Environment::Production), None)
        .await
        .unwrap()
        .is_empty());
    assert!(harness.cluster.deploys().is_empty());
}

#[tokio::test]
async fn test_failed_test_run_does_not_validate() {
    let harness = Harness::new();
    harness.cluster.break_image(image(V1_1));

    let test_run = harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    assert_eq!(test_run.stage, PipelineStage::Failed);

    let err = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PromotionNotValidated(_)));
}

#[tokio::test]
async fn test_override_skips_validation() {
    let harness = Harness::new();

    let run = harness
        .orchestrator
        .promote(Environment::Production, V1_1, true)
        .await
        .unwrap();

    assert_eq!(run.stage, PipelineStage::Succeeded);
    assert_eq!(run.image, Some(image(V1_1)));
    assert_eq!(harness.cluster.deploys_to(Environment::Production), vec![image(V1_1)]);
}

#[tokio::test]
async fn test_promotion_only_targets_production() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .promote(Environment::Test, V1_1, true)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidPromotionTarget(Environment::Test)));
}

#[tokio::test]
async fn test_approval_gate_holds_until_approved() {
    let harness = Harness::new();
    harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();

    let waiting = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();
    assert_eq!(waiting.stage, PipelineStage::AwaitingProdApproval);
    assert!(harness.cluster.deploys_to(Environment::Production).is_empty());

    let err = harness
        .orchestrator
        .approve(Environment::Production, Version::new(1, 2, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ApprovalMismatch { .. }));

    let approved = harness
        .orchestrator
        .approve(Environment::Production, V1_1)
        .await
        .unwrap();
    assert_eq!(approved.id, waiting.id);
    assert_eq!(approved.stage, PipelineStage::Succeeded);
    assert_eq!(harness.cluster.deploys_to(Environment::Production), vec![image(V1_1)]);
}

#[tokio::test]
async fn test_approve_with_nothing_waiting() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .approve(Environment::Production, V1_1)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NothingAwaitingApproval(_)));
}

#[tokio::test]
async fn test_second_promotion_rejected_without_touching_record() {
    let harness = Harness::new();
    harness.ship(Version::new(1, 0, 0)).await;
    harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();

    let before = harness.orchestrator.record(Environment::Production).await.unwrap();
    let waiting = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap_err();

    match err {
        PipelineError::RunInProgress { environment, run_id } => {
            assert_eq!(environment, Environment::Production);
            assert_eq!(run_id, waiting.id);
        }
        other => panic!("expected RunInProgress, got {:?}", other),
    }
    assert_eq!(harness.orchestrator.record(Environment::Production).await.unwrap(), before);
    assert_eq!(
        harness.orchestrator.history(Some(Environment::Production), None).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_test_runs_do_not_block_production() {
    let harness = Harness::new();
    harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    let run = harness
        .orchestrator
        .start_test_run(release(Version::new(1, 2, 0)))
        .await
        .unwrap();

    assert_eq!(run.stage, PipelineStage::Succeeded);
}

#[tokio::test]
async fn test_abort_before_deploy() {
    let harness = Harness::new();
    harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    let waiting = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    let aborted = harness.orchestrator.abort(waiting.id).await.unwrap();

    assert_eq!(aborted.stage, PipelineStage::Aborted);
    assert!(aborted.completed_at.is_some());
    assert!(harness.cluster.deploys_to(Environment::Production).is_empty());

    // The environment is free again
    let run = harness
        .orchestrator
        .promote(Environment::Production, V1_1, false)
        .await
        .unwrap();
    assert_eq!(run.stage, PipelineStage::Succeeded);

    let err = harness.orchestrator.abort(run.id).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AbortNotAllowed { stage: PipelineStage::Succeeded, .. }
    ));
}

#[tokio::test]
async fn test_approval_from_another_process() {
    let first = Harness::new();
    first.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    first
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    // A fresh orchestrator over the same store, as a second CLI invocation
    let second = Harness::with_store(first.store.clone(), first.cluster.clone());
    let run = second
        .orchestrator
        .approve(Environment::Production, V1_1)
        .await
        .unwrap();

    assert_eq!(run.stage, PipelineStage::Succeeded);
    let record = second.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Healthy);
}

#[tokio::test]
async fn test_concurrent_test_runs_admit_one() {
    let harness = Arc::new(Harness::new());

    let a = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.orchestrator.start_test_run(release(V1_1)).await })
    };
    let b = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .orchestrator
                .start_test_run(release(Version::new(1, 2, 0)))
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(PipelineError::RunInProgress { .. })))
        .count();

    // Both may succeed if the first finished before the second was admitted
    assert!(admitted >= 1);
    assert_eq!(admitted + rejected, 2);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_promotions_from_two_processes_admit_one() {
    use shipwright::persistence::{RunStore, SqliteRunStore};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let first_store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(&path).await.unwrap());
    let second_store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(&path).await.unwrap());

    let first = Harness::with_store(first_store, Arc::new(FakeCluster::new()));
    first.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    let second = Harness::with_store(second_store, first.cluster.clone());

    let (a, b) = tokio::join!(
        first.orchestrator.request_promotion(Environment::Production, V1_1, false),
        second.orchestrator.request_promotion(Environment::Production, V1_1, false),
    );

    let results = [a, b];
    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(PipelineError::RunInProgress { run_id, .. }) if *run_id == admitted[0].id
    )));

    let waiting: Vec<_> = first
        .orchestrator
        .history(Some(Environment::Production), None)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| !r.is_terminal())
        .collect();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].stage, PipelineStage::AwaitingProdApproval);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_abort_after_approval_elsewhere_is_refused() {
    use shipwright::persistence::{RunStore, SqliteRunStore};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let first_store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(&path).await.unwrap());
    let second_store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(&path).await.unwrap());

    let first = Harness::with_store(first_store, Arc::new(FakeCluster::new()));
    first.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    let waiting = first
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    let second = Harness::with_store(second_store, first.cluster.clone());
    second.orchestrator.approve(Environment::Production, V1_1).await.unwrap();

    let err = first.orchestrator.abort(waiting.id).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AbortNotAllowed { stage: PipelineStage::Succeeded, .. }
    ));
    assert_eq!(
        first.orchestrator.run(waiting.id).await.unwrap().stage,
        PipelineStage::Succeeded
    );
}
