//! Failed deploys, automatic rollback and manual rollback

use crate::helpers::*;
use shipwright::core::error::PipelineError;
use shipwright::core::{DeploymentStatus, Environment, FailureKind, PipelineRun, PipelineStage, Version};
use shipwright::execution::ExecutionEvent;

const V1_0: Version = Version::new(1, 0, 0);
const V1_1: Version = Version::new(1, 1, 0);

/// v1.0.0 live in production, v1.1.0 validated in test
async fn staged() -> Harness {
    let harness = Harness::new();
    harness.ship(V1_0).await;
    let run = harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    assert_eq!(run.stage, PipelineStage::Succeeded);
    harness
}

async fn promote(harness: &Harness, version: Version) -> PipelineRun {
    harness
        .orchestrator
        .promote(Environment::Production, version, false)
        .await
        .unwrap()
}

fn failure_kind(run: &PipelineRun) -> Option<FailureKind> {
    run.failure.as_ref().map(|f| f.kind)
}

#[tokio::test]
async fn test_unhealthy_production_rolls_back() {
    let harness = staged().await;
    harness.cluster.break_image(image(V1_1));

    let run = promote(&harness, V1_1).await;

    assert_eq!(run.stage, PipelineStage::Failed);
    assert_eq!(failure_kind(&run), Some(FailureKind::Unhealthy));
    assert_eq!(
        run.failure.as_ref().and_then(|f| f.rolled_back_to.clone()),
        Some(image(V1_0))
    );
    assert_eq!(
        harness.stages_of(&run),
        vec![
            PipelineStage::AwaitingProdApproval,
            PipelineStage::ProdDeploying,
            PipelineStage::ProdHealthCheck,
            PipelineStage::RollingBack,
            PipelineStage::Failed,
        ]
    );

    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::RolledBack);
    assert_eq!(record.image_ref, Some(image(V1_0)));
    assert_eq!(record.deployed_version, Some(V1_0));
    assert_eq!(record.last_known_good, Some(image(V1_0)));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));

    assert!(harness.events().iter().any(|e| matches!(
        e,
        ExecutionEvent::RollbackStarted { environment: Environment::Production, target: Some(t) }
            if *t == image(V1_0)
    )));
}

#[tokio::test]
async fn test_silent_service_times_out() {
    let harness = staged().await;
    harness.cluster.silence_image(image(V1_1));

    let run = promote(&harness, V1_1).await;

    assert_eq!(failure_kind(&run), Some(FailureKind::DeployTimeout));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));
}

#[tokio::test]
async fn test_stale_instance_is_not_healthy() {
    let harness = staged().await;
    // Deploys are accepted but the old version keeps answering
    harness.cluster.freeze(Environment::Production);

    let run = promote(&harness, V1_1).await;

    assert_eq!(failure_kind(&run), Some(FailureKind::Unhealthy));
    assert!(run.attempts > 1);
    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn test_first_deploy_failure_needs_operator() {
    let harness = Harness::new();
    harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    harness.cluster.break_image(image(V1_1));

    let run = promote(&harness, V1_1).await;

    assert_eq!(run.stage, PipelineStage::Failed);
    assert_eq!(failure_kind(&run), Some(FailureKind::NoKnownGoodState));
    assert!(run.failure.as_ref().unwrap().kind.requires_operator());
    assert_eq!(harness.cluster.deploys_to(Environment::Production), vec![image(V1_1)]);

    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.image_ref, Some(image(V1_1)));
    assert_eq!(record.last_known_good, None);
}

#[tokio::test]
async fn test_unhealthy_rollback_target() {
    let harness = staged().await;
    harness.cluster.break_image(image(V1_1));
    harness.cluster.break_image(image(V1_0));

    let run = promote(&harness, V1_1).await;

    assert_eq!(failure_kind(&run), Some(FailureKind::RollbackFailed));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));

    // The record follows the image that is actually running
    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.image_ref, Some(image(V1_0)));
    assert_eq!(record.deployed_version, Some(V1_0));
    assert_eq!(record.last_known_good, Some(image(V1_0)));
}

#[tokio::test]
async fn test_test_failure_never_rolls_back() {
    let harness = Harness::new();
    harness.ship(V1_0).await;
    harness.cluster.break_image(image(V1_1));

    let run = harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();

    assert_eq!(run.stage, PipelineStage::Failed);
    assert_eq!(failure_kind(&run), Some(FailureKind::Unhealthy));
    assert!(!harness.stages_of(&run).contains(&PipelineStage::RollingBack));
    assert!(!harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::RollbackStarted { .. })));
    assert_eq!(harness.cluster.current(Environment::Test), Some(image(V1_1)));

    let record = harness.orchestrator.record(Environment::Test).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.last_known_good, Some(image(V1_0)));
}

#[tokio::test]
async fn test_known_good_advances_with_healthy_deploys() {
    let harness = Harness::new();
    harness.ship(V1_0).await;
    harness.ship(V1_1).await;

    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.image_ref, Some(image(V1_1)));
    assert_eq!(record.last_known_good, Some(image(V1_0)));
    assert_eq!(record.last_known_good_version, Some(V1_0));
}

#[tokio::test]
async fn test_manual_rollback() {
    let harness = Harness::new();
    harness.ship(V1_0).await;
    harness.ship(V1_1).await;

    let record = harness
        .orchestrator
        .rollback_environment(Environment::Production)
        .await
        .unwrap();

    assert_eq!(record.status, DeploymentStatus::RolledBack);
    assert_eq!(record.image_ref, Some(image(V1_0)));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));
    assert_eq!(
        harness.orchestrator.record(Environment::Production).await.unwrap(),
        record
    );
}

#[tokio::test]
async fn test_manual_rollback_to_unhealthy_image() {
    let harness = Harness::new();
    harness.ship(V1_0).await;
    harness.ship(V1_1).await;
    harness.cluster.break_image(image(V1_0));

    let err = harness
        .orchestrator
        .rollback_environment(Environment::Production)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::RollbackFailed { .. }));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));

    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.image_ref, Some(image(V1_0)));
    assert_eq!(record.last_known_good, Some(image(V1_0)));
}

#[tokio::test]
async fn test_manual_rollback_without_known_good() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .rollback_environment(Environment::Production)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoKnownGoodState(Environment::Production)));
    assert!(harness.cluster.deploys().is_empty());
}

#[tokio::test]
async fn test_manual_rollback_blocked_by_active_run() {
    let harness = staged().await;
    let waiting = harness
        .orchestrator
        .request_promotion(Environment::Production, V1_1, false)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .rollback_environment(Environment::Production)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::RunInProgress { run_id, .. } if run_id == waiting.id));
}
