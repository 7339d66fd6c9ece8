//! Pipeline orchestrator - drives releases through the environments

use crate::{
    adapters::{ArtifactRegistry, DeployTarget, HealthEndpoint},
    core::{
        config::{EnvironmentSettings, ShipwrightConfig},
        error::{PipelineError, RollbackError},
        DeploymentRecord, Environment, FailureKind, ImageRef, PipelineRun, PipelineStage, Release,
        RunFailure, Version,
    },
    execution::{HealthProbe, ProbeAttempt, RollbackController, RollbackOutcome, RunScheduler},
    persistence::RunStore,
};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur while driving runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    ReleasePublished {
        version: Version,
    },
    RunQueued {
        run_id: Uuid,
        environment: Environment,
        version: Version,
    },
    StageChanged {
        run_id: Uuid,
        environment: Environment,
        from: PipelineStage,
        to: PipelineStage,
    },
    ProbeAttempt {
        environment: Environment,
        attempt: u32,
        observation: String,
    },
    RollbackStarted {
        environment: Environment,
        target: Option<ImageRef>,
    },
    RunFinished {
        run_id: Uuid,
        environment: Environment,
        stage: PipelineStage,
        reason: Option<String>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Resolved settings for both environments
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub test: EnvironmentSettings,
    pub production: EnvironmentSettings,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ShipwrightConfig) -> Self {
        Self {
            test: config.environment(Environment::Test),
            production: config.environment(Environment::Production),
        }
    }

    pub fn get(&self, environment: Environment) -> &EnvironmentSettings {
        match environment {
            Environment::Test => &self.test,
            Environment::Production => &self.production,
        }
    }
}

/// How a deploy step ended, before the run is finished
enum DeployOutcome {
    Healthy,
    Failed(FailureKind, String),
}

/// Release-and-promotion state machine
///
/// Owns every `PipelineRun` for its lifetime and is the only writer of
/// deployment records.
pub struct PipelineOrchestrator {
    registry: Arc<dyn ArtifactRegistry>,
    deployer: Arc<dyn DeployTarget>,
    probe: HealthProbe,
    rollback: RollbackController,
    store: Arc<dyn RunStore>,
    scheduler: RunScheduler,
    settings: OrchestratorSettings,
    event_handlers: RwLock<Vec<EventHandler>>,
}

impl PipelineOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        registry: Arc<dyn ArtifactRegistry>,
        deployer: Arc<dyn DeployTarget>,
        health: Arc<dyn HealthEndpoint>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        let probe = HealthProbe::new(health);
        let rollback = RollbackController::new(deployer.clone(), probe.clone());

        Self {
            registry,
            deployer,
            probe,
            rollback,
            scheduler: RunScheduler::new(store.clone()),
            store,
            settings,
            event_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.write() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        if let Ok(handlers) = self.event_handlers.read() {
            for handler in handlers.iter() {
                handler(event.clone());
            }
        }
    }

    fn probe_observer(&self, environment: Environment) -> impl FnMut(&ProbeAttempt) + Send + '_ {
        move |attempt| {
            self.emit_event(ExecutionEvent::ProbeAttempt {
                environment,
                attempt: attempt.attempt,
                observation: attempt.observation.to_string(),
            })
        }
    }

    /// Consume published releases, starting a test run for each
    pub async fn listen(&self, mut releases: mpsc::Receiver<Release>) {
        while let Some(release) = releases.recv().await {
            self.emit_event(ExecutionEvent::ReleasePublished {
                version: release.version,
            });
            match self.start_test_run(release).await {
                Ok(run) => info!("Test run {} finished in {}", run.id, run.stage),
                Err(e) => error!("Could not start test run: {}", e),
            }
        }
    }

    /// Build, push, deploy and verify a release in the test environment
    ///
    /// Returns the run in its terminal stage. Stage failures are recorded on
    /// the run; `Err` means the run could not be started or persisted.
    pub async fn start_test_run(&self, release: Release) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(release, Environment::Test);
        self.scheduler.admit(&run).await?;
        self.queued(&run);

        self.transition(&mut run, PipelineStage::Building, None).await?;
        let built = match self.registry.build(&run.release).await {
            Ok(image) => image,
            Err(e) => {
                return self
                    .fail_run(run, FailureKind::BuildFailed, e.to_string())
                    .await
            }
        };

        let image = match self.registry.push(&built).await {
            Ok(image) => image,
            Err(e) => {
                return self
                    .fail_run(run, FailureKind::PushFailed, e.to_string())
                    .await
            }
        };
        run.image = Some(image.clone());
        self.transition(&mut run, PipelineStage::Pushed, Some(image.to_string()))
            .await?;

        self.transition(&mut run, PipelineStage::TestDeploying, None).await?;
        self.continue_test(run).await
    }

    /// Test path from `TestDeploying` on. Test failures never roll back.
    async fn continue_test(&self, mut run: PipelineRun) -> Result<PipelineRun, PipelineError> {
        match self.deploy_and_verify(&mut run).await? {
            DeployOutcome::Healthy => self.succeed(run).await,
            DeployOutcome::Failed(kind, reason) => self.fail_run(run, kind, reason).await,
        }
    }

    /// Queue a production promotion of an explicit version
    ///
    /// The version must have a succeeded test run unless `override_validation`
    /// is set. The run stops in `AwaitingProdApproval`.
    pub async fn request_promotion(
        &self,
        environment: Environment,
        version: Version,
        override_validation: bool,
    ) -> Result<PipelineRun, PipelineError> {
        if environment != Environment::Production {
            return Err(PipelineError::InvalidPromotionTarget(environment));
        }

        let test_runs = self
            .store
            .list_runs(Some(Environment::Test), None)
            .await?;
        let validated = test_runs
            .iter()
            .find(|r| r.release.version == version && r.stage == PipelineStage::Succeeded);

        let (release, image) = match validated {
            Some(run) => (run.release.clone(), run.image.clone()),
            None if override_validation => {
                warn!("Promoting {} without a succeeded test run (override)", version);
                let release = test_runs
                    .iter()
                    .find(|r| r.release.version == version)
                    .map(|r| r.release.clone())
                    .unwrap_or_else(|| Release::new(version, version.tag(), None));
                (release, None)
            }
            None => return Err(PipelineError::PromotionNotValidated(version)),
        };

        let mut run = PipelineRun::new(release, environment);
        run.image = Some(image.unwrap_or_else(|| self.registry.image_for(&version)));

        self.scheduler.admit(&run).await?;
        self.queued(&run);
        self.transition(&mut run, PipelineStage::AwaitingProdApproval, None)
            .await?;
        info!("Run {} awaiting production approval for {}", run.id, version);
        Ok(run)
    }

    /// Approve the awaiting production run for `version` and drive it
    pub async fn approve(&self, environment: Environment, version: Version) -> Result<PipelineRun, PipelineError> {
        if environment != Environment::Production {
            return Err(PipelineError::InvalidPromotionTarget(environment));
        }

        let run = match self.store.active_run(environment).await? {
            Some(run) if run.stage == PipelineStage::AwaitingProdApproval => run,
            _ => return Err(PipelineError::NothingAwaitingApproval(version)),
        };
        if run.release.version != version {
            return Err(PipelineError::ApprovalMismatch {
                run_id: run.id,
                awaiting: run.release.version,
                requested: version,
            });
        }

        self.scheduler.adopt(&run).await?;
        info!("Production deploy of {} approved", version);
        self.continue_production(run).await
    }

    /// Request and approve in one step
    pub async fn promote(
        &self,
        environment: Environment,
        version: Version,
        override_validation: bool,
    ) -> Result<PipelineRun, PipelineError> {
        let run = self
            .request_promotion(environment, version, override_validation)
            .await?;
        self.continue_production(run).await
    }

    /// Production path from `AwaitingProdApproval` (or an interrupted deploy)
    async fn continue_production(&self, mut run: PipelineRun) -> Result<PipelineRun, PipelineError> {
        if run.stage == PipelineStage::AwaitingProdApproval
            && !self
                .leave_approval(&mut run, PipelineStage::ProdDeploying, Some("approved".to_string()))
                .await?
        {
            self.scheduler.release(run.environment, run.id).await;
            return Err(PipelineError::NothingAwaitingApproval(run.release.version));
        }

        match self.deploy_and_verify(&mut run).await? {
            DeployOutcome::Healthy => self.succeed(run).await,
            DeployOutcome::Failed(kind, reason) => self.roll_back_run(run, kind, reason).await,
        }
    }

    /// Abort a run waiting for production approval
    pub async fn abort(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        let mut run = self.run(run_id).await?;

        if run.stage != PipelineStage::AwaitingProdApproval
            || !self
                .leave_approval(&mut run, PipelineStage::Aborted, Some("aborted by operator".to_string()))
                .await?
        {
            let current = self.run(run_id).await?;
            return Err(PipelineError::AbortNotAllowed {
                run_id,
                stage: current.stage,
            });
        }

        self.finish(&run).await;
        Ok(run)
    }

    /// Deploy step shared by both environments, from `*Deploying` or
    /// `*HealthCheck`
    async fn deploy_and_verify(&self, run: &mut PipelineRun) -> Result<DeployOutcome, PipelineError> {
        let environment = run.environment;
        let settings = self.settings.get(environment).clone();
        let version = run.release.version;
        let image = match &run.image {
            Some(image) => image.clone(),
            None => {
                return Ok(DeployOutcome::Failed(
                    FailureKind::DeployRejected,
                    "run has no artifact to deploy".to_string(),
                ))
            }
        };

        let health_stage = match environment {
            Environment::Test => PipelineStage::TestHealthCheck,
            Environment::Production => PipelineStage::ProdHealthCheck,
        };

        if run.stage != health_stage {
            // Point the record at the new image before the deploy is issued
            let mut record = self.record(environment).await?;
            record.begin_deploy(&image, version);
            self.store.save_record(&record).await?;

            if let Err(e) = self.deployer.deploy(environment, &image).await {
                self.mark_record_failed(environment).await?;
                return Ok(DeployOutcome::Failed(FailureKind::DeployRejected, e.to_string()));
            }

            tokio::time::sleep(settings.health.stabilization).await;
            self.transition(run, health_stage, None).await?;
        }

        let report = self
            .probe
            .check(
                &settings.health_url,
                &settings.health,
                Some(&version),
                self.probe_observer(environment),
            )
            .await;
        run.attempts = report.attempts;
        self.store.save_run(run).await?;

        if let Some(kind) = report.verdict.failure_kind() {
            self.mark_record_failed(environment).await?;
            return Ok(DeployOutcome::Failed(kind, report.verdict.reason().to_string()));
        }

        let mut record = self.record(environment).await?;
        record.mark_healthy();
        self.store.save_record(&record).await?;

        if let Err(e) = self.registry.alias(&image, &settings.latest_alias).await {
            warn!("Failed to move {} to {}: {}", settings.latest_alias, image, e);
        }

        Ok(DeployOutcome::Healthy)
    }

    /// Roll a failed production run back and finish it as `Failed`
    async fn roll_back_run(
        &self,
        mut run: PipelineRun,
        kind: FailureKind,
        reason: String,
    ) -> Result<PipelineRun, PipelineError> {
        let environment = run.environment;

        if run.stage != PipelineStage::RollingBack {
            // Kept on the run so an interrupted rollback knows why it started
            run.failure = Some(RunFailure {
                kind,
                message: reason.clone(),
                rolled_back_to: None,
            });
            self.transition(&mut run, PipelineStage::RollingBack, Some(reason.clone()))
                .await?;
        }

        let failure = match self.restore_known_good(environment).await? {
            Ok((_, outcome)) => RunFailure {
                kind,
                message: format!("{}; rolled back to {}", reason, outcome.image),
                rolled_back_to: Some(outcome.image),
            },
            Err(RollbackError::NoKnownGoodState(_)) => {
                error!("{} has no last-known-good deployment; operator intervention required", environment);
                RunFailure {
                    kind: FailureKind::NoKnownGoodState,
                    message: format!("{}; no last-known-good deployment to roll back to", reason),
                    rolled_back_to: None,
                }
            }
            Err(e) => {
                error!("Rollback of {} failed: {}", environment, e);
                RunFailure {
                    kind: FailureKind::RollbackFailed,
                    message: format!("{}; {}", reason, e),
                    rolled_back_to: None,
                }
            }
        };

        self.record_failure(&mut run, failure).await?;
        self.finish(&run).await;
        Ok(run)
    }

    /// Redeploy last-known-good, keeping the record in step with what runs
    ///
    /// The record points at the rollback target before the deploy is issued
    /// and ends `RolledBack` or `Failed`. Without a known-good image nothing
    /// is deployed and the record is left alone.
    async fn restore_known_good(
        &self,
        environment: Environment,
    ) -> Result<Result<(DeploymentRecord, RollbackOutcome), RollbackError>, PipelineError> {
        let mut record = self.record(environment).await?;
        self.emit_event(ExecutionEvent::RollbackStarted {
            environment,
            target: record.last_known_good.clone(),
        });

        if record.begin_rollback() {
            self.store.save_record(&record).await?;
        }

        let result = self
            .rollback
            .rollback(&record, self.settings.get(environment), self.probe_observer(environment))
            .await;

        match result {
            Ok(outcome) => {
                record.mark_rolled_back(outcome.image.clone(), outcome.version);
                self.store.save_record(&record).await?;
                Ok(Ok((record, outcome)))
            }
            Err(e @ RollbackError::NoKnownGoodState(_)) => Ok(Err(e)),
            Err(e) => {
                record.mark_failed();
                self.store.save_record(&record).await?;
                Ok(Err(e))
            }
        }
    }

    /// Manually restore an environment to its last-known-good deployment
    pub async fn rollback_environment(&self, environment: Environment) -> Result<DeploymentRecord, PipelineError> {
        let slot = self.scheduler.reserve_rollback(environment).await?;
        let result = self.manual_rollback(environment).await;
        self.scheduler.release(environment, slot).await;
        result
    }

    async fn manual_rollback(&self, environment: Environment) -> Result<DeploymentRecord, PipelineError> {
        let (record, _) = self.restore_known_good(environment).await??;
        Ok(record)
    }

    /// Drive runs left non-terminal by an earlier process
    ///
    /// Runs that never deployed are failed as interrupted; deploys and health
    /// checks are picked up where they stopped; rollbacks are retried. Runs
    /// awaiting approval keep waiting.
    pub async fn resume(&self) -> Result<Vec<PipelineRun>, PipelineError> {
        let mut resumed = Vec::new();

        for environment in Environment::ALL {
            let Some(mut run) = self.store.active_run(environment).await? else {
                continue;
            };
            if run.stage == PipelineStage::AwaitingProdApproval {
                info!("Run {} still awaiting approval", run.id);
                continue;
            }

            self.scheduler.adopt(&run).await?;
            info!("Resuming run {} in {}", run.id, run.stage);

            let finished = match run.stage {
                PipelineStage::Queued | PipelineStage::Building | PipelineStage::Pushed => {
                    let note = format!("interrupted in {}", run.stage);
                    self.fail_run(run, FailureKind::Interrupted, note).await?
                }
                PipelineStage::TestDeploying | PipelineStage::TestHealthCheck => {
                    self.continue_test(run).await?
                }
                PipelineStage::ProdDeploying | PipelineStage::ProdHealthCheck => {
                    self.continue_production(run).await?
                }
                PipelineStage::RollingBack => {
                    let (kind, reason) = run
                        .failure
                        .take()
                        .map(|f| (f.kind, f.message))
                        .unwrap_or((FailureKind::Interrupted, "interrupted during rollback".to_string()));
                    self.roll_back_run(run, kind, reason).await?
                }
                _ => {
                    self.scheduler.release(environment, run.id).await;
                    continue;
                }
            };
            resumed.push(finished);
        }

        Ok(resumed)
    }

    /// Current deployment record of an environment
    pub async fn record(&self, environment: Environment) -> Result<DeploymentRecord, PipelineError> {
        Ok(self
            .store
            .load_record(environment)
            .await?
            .unwrap_or_else(|| DeploymentRecord::empty(environment)))
    }

    pub async fn run(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    /// Run history, newest first
    pub async fn history(
        &self,
        environment: Option<Environment>,
        limit: Option<usize>,
    ) -> Result<Vec<PipelineRun>, PipelineError> {
        Ok(self.store.list_runs(environment, limit).await?)
    }

    async fn mark_record_failed(&self, environment: Environment) -> Result<(), PipelineError> {
        let mut record = self.record(environment).await?;
        record.mark_failed();
        self.store.save_record(&record).await?;
        Ok(())
    }

    fn queued(&self, run: &PipelineRun) {
        info!("Queued run {} of {} for {}", run.id, run.release.version, run.environment);
        self.emit_event(ExecutionEvent::RunQueued {
            run_id: run.id,
            environment: run.environment,
            version: run.release.version,
        });
    }

    async fn transition(
        &self,
        run: &mut PipelineRun,
        next: PipelineStage,
        note: Option<String>,
    ) -> Result<(), PipelineError> {
        let from = run.stage;
        run.advance(next, note)?;
        self.stage_saved(run, from).await
    }

    /// Move a run out of `AwaitingProdApproval` unless another process
    /// already did. Returns false, leaving `run` as it was, when it lost.
    async fn leave_approval(
        &self,
        run: &mut PipelineRun,
        next: PipelineStage,
        note: Option<String>,
    ) -> Result<bool, PipelineError> {
        let from = run.stage;
        let mut moved = run.clone();
        moved.advance(next, note)?;

        if !self.store.save_run_if(&moved, from).await? {
            warn!("Run {} left {} elsewhere", run.id, from);
            return Ok(false);
        }

        *run = moved;
        self.announce(run, from);
        Ok(true)
    }

    /// Persist a run that just left `from` and announce the change
    async fn stage_saved(&self, run: &PipelineRun, from: PipelineStage) -> Result<(), PipelineError> {
        self.store.save_run(run).await?;
        self.announce(run, from);
        Ok(())
    }

    fn announce(&self, run: &PipelineRun, from: PipelineStage) {
        info!("Run {} ({}): {} -> {}", run.id, run.environment, from, run.stage);
        self.emit_event(ExecutionEvent::StageChanged {
            run_id: run.id,
            environment: run.environment,
            from,
            to: run.stage,
        });
    }

    async fn succeed(&self, mut run: PipelineRun) -> Result<PipelineRun, PipelineError> {
        self.transition(&mut run, PipelineStage::Succeeded, None).await?;
        self.finish(&run).await;
        Ok(run)
    }

    async fn fail_run(&self, mut run: PipelineRun, kind: FailureKind, message: String) -> Result<PipelineRun, PipelineError> {
        warn!("Run {} failed ({:?}): {}", run.id, kind, message);
        self.record_failure(
            &mut run,
            RunFailure {
                kind,
                message,
                rolled_back_to: None,
            },
        )
        .await?;
        self.finish(&run).await;
        Ok(run)
    }

    async fn record_failure(&self, run: &mut PipelineRun, failure: RunFailure) -> Result<(), PipelineError> {
        let from = run.stage;
        run.fail(failure)?;
        self.stage_saved(run, from).await
    }

    /// Free the environment of a terminal run
    async fn finish(&self, run: &PipelineRun) {
        self.scheduler.release(run.environment, run.id).await;

        self.emit_event(ExecutionEvent::RunFinished {
            run_id: run.id,
            environment: run.environment,
            stage: run.stage,
            reason: run.terminal_reason(),
        });
    }
}
