//! Picking up runs left behind by an interrupted process

use crate::helpers::*;
use shipwright::core::{
    DeploymentRecord, DeploymentStatus, Environment, FailureKind, PipelineRun, PipelineStage, RunFailure,
    Version,
};
use shipwright::persistence::{InMemoryPersistence, RunStore};
use std::sync::Arc;

const V1_0: Version = Version::new(1, 0, 0);
const V1_1: Version = Version::new(1, 1, 0);

/// A production run for v1.1.0 walked through `stages`
fn interrupted_run(stages: &[PipelineStage]) -> PipelineRun {
    let mut run = PipelineRun::new(release(V1_1), Environment::Production);
    run.image = Some(image(V1_1));
    for stage in stages {
        run.advance(*stage, None).unwrap();
    }
    run
}

/// Production record with v1.0.0 known good and v1.1.0 being deployed
fn deploying_record() -> DeploymentRecord {
    let mut record = DeploymentRecord::empty(Environment::Production);
    record.begin_deploy(&image(V1_0), V1_0);
    record.mark_healthy();
    record.begin_deploy(&image(V1_1), V1_1);
    record
}

async fn left_behind(store: Arc<dyn RunStore>, run: &PipelineRun, record: &DeploymentRecord) -> Harness {
    store.save_run(run).await.unwrap();
    store.save_record(record).await.unwrap();
    Harness::with_store(store, Arc::new(FakeCluster::new()))
}

#[tokio::test]
async fn test_resume_health_check_without_redeploy() {
    let run = interrupted_run(&[
        PipelineStage::AwaitingProdApproval,
        PipelineStage::ProdDeploying,
        PipelineStage::ProdHealthCheck,
    ]);
    let harness = left_behind(Arc::new(InMemoryPersistence::new()), &run, &deploying_record()).await;
    harness.cluster.running(Environment::Production, image(V1_1));

    let resumed = harness.orchestrator.resume().await.unwrap();

    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, run.id);
    assert_eq!(resumed[0].stage, PipelineStage::Succeeded);
    assert!(harness.cluster.deploys().is_empty());

    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Healthy);
    assert_eq!(record.last_known_good, Some(image(V1_0)));
}

#[tokio::test]
async fn test_resume_deploy_reissues_same_image() {
    let run = interrupted_run(&[PipelineStage::AwaitingProdApproval, PipelineStage::ProdDeploying]);
    let harness = left_behind(Arc::new(InMemoryPersistence::new()), &run, &deploying_record()).await;
    harness.cluster.running(Environment::Production, image(V1_0));

    let resumed = harness.orchestrator.resume().await.unwrap();

    assert_eq!(resumed[0].stage, PipelineStage::Succeeded);
    assert_eq!(harness.cluster.deploys_to(Environment::Production), vec![image(V1_1)]);

    // The pending image did not become its own known-good
    let record = harness.orchestrator.record(Environment::Production).await.unwrap();
    assert_eq!(record.image_ref, Some(image(V1_1)));
    assert_eq!(record.last_known_good, Some(image(V1_0)));
}

#[tokio::test]
async fn test_resume_fails_runs_that_never_deployed() {
    let mut run = PipelineRun::new(release(V1_1), Environment::Test);
    run.advance(PipelineStage::Building, None).unwrap();

    let store: Arc<dyn RunStore> = Arc::new(InMemoryPersistence::new());
    store.save_run(&run).await.unwrap();
    let harness = Harness::with_store(store, Arc::new(FakeCluster::new()));

    let resumed = harness.orchestrator.resume().await.unwrap();

    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].stage, PipelineStage::Failed);
    assert_eq!(
        resumed[0].failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Interrupted)
    );
    assert!(harness.cluster.deploys().is_empty());

    // The environment is usable again
    let next = harness.orchestrator.start_test_run(release(V1_1)).await.unwrap();
    assert_eq!(next.stage, PipelineStage::Succeeded);
}

#[tokio::test]
async fn test_resume_leaves_approval_waiting() {
    let run = interrupted_run(&[PipelineStage::AwaitingProdApproval]);
    let harness = left_behind(
        Arc::new(InMemoryPersistence::new()),
        &run,
        &DeploymentRecord::empty(Environment::Production),
    )
    .await;

    let resumed = harness.orchestrator.resume().await.unwrap();

    assert!(resumed.is_empty());
    let stored = harness.orchestrator.run(run.id).await.unwrap();
    assert_eq!(stored.stage, PipelineStage::AwaitingProdApproval);
    assert!(harness.cluster.deploys().is_empty());
}

#[tokio::test]
async fn test_resume_retries_rollback() {
    let mut run = interrupted_run(&[
        PipelineStage::AwaitingProdApproval,
        PipelineStage::ProdDeploying,
        PipelineStage::ProdHealthCheck,
    ]);
    run.failure = Some(RunFailure {
        kind: FailureKind::DeployTimeout,
        message: "no health acknowledgement".to_string(),
        rolled_back_to: None,
    });
    run.advance(PipelineStage::RollingBack, None).unwrap();

    let mut record = deploying_record();
    record.mark_failed();
    let harness = left_behind(Arc::new(InMemoryPersistence::new()), &run, &record).await;
    harness.cluster.running(Environment::Production, image(V1_1));

    let resumed = harness.orchestrator.resume().await.unwrap();

    let finished = &resumed[0];
    assert_eq!(finished.stage, PipelineStage::Failed);
    let failure = finished.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::DeployTimeout);
    assert_eq!(failure.rolled_back_to, Some(image(V1_0)));
    assert_eq!(harness.cluster.current(Environment::Production), Some(image(V1_0)));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_resume_from_sqlite_store() {
    use shipwright::persistence::SqliteRunStore;

    let store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::in_memory().await.unwrap());
    let run = interrupted_run(&[
        PipelineStage::AwaitingProdApproval,
        PipelineStage::ProdDeploying,
        PipelineStage::ProdHealthCheck,
    ]);
    let harness = left_behind(store, &run, &deploying_record()).await;
    harness.cluster.running(Environment::Production, image(V1_1));

    let resumed = harness.orchestrator.resume().await.unwrap();

    assert_eq!(resumed[0].stage, PipelineStage::Succeeded);
    assert!(harness
        .store
        .active_run(Environment::Production)
        .await
        .unwrap()
        .is_none());
}
