//! Fakes and fixtures shared by the scenario tests

use async_trait::async_trait;
use shipwright::adapters::{
    AdapterError, ArtifactRegistry, DeployTarget, HealthEndpoint, HealthResponse, SourceControl,
};
use shipwright::core::config::{EnvironmentSettings, HealthSettings};
use shipwright::core::{Environment, ImageRef, PipelineRun, PipelineStage, Release, Version};
use shipwright::execution::{ExecutionEvent, OrchestratorSettings, PipelineOrchestrator};
use shipwright::persistence::{InMemoryPersistence, RunStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REPOSITORY: &str = "registry.test/app";
pub const TEST_HEALTH: &str = "http://test.app.local/api/health";
pub const PROD_HEALTH: &str = "http://app.local/api/health";

pub fn image(version: Version) -> ImageRef {
    ImageRef::tagged(REPOSITORY, &version.tag())
}

pub fn release(version: Version) -> Release {
    Release::new(version, "abc1234", Some(format!("Release {}", version.tag())))
}

fn environment_settings(health_url: &str, alias: &str) -> EnvironmentSettings {
    EnvironmentSettings {
        health_url: health_url.to_string(),
        health: HealthSettings {
            budget: Duration::from_millis(150),
            poll_interval: Duration::from_millis(10),
            stabilization: Duration::ZERO,
            request_timeout: Duration::from_millis(50),
        },
        latest_alias: alias.to_string(),
    }
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        test: environment_settings(TEST_HEALTH, "test-latest"),
        production: environment_settings(PROD_HEALTH, "production-latest"),
    }
}

/// Git repository with an in-memory tag namespace
pub struct FakeScm {
    pub local_tags: Mutex<Vec<String>>,
    pub remote_tags: Mutex<Vec<String>>,
    pub clean: bool,
    pub reject_push: bool,
}

impl FakeScm {
    pub fn with_tags(tags: &[&str]) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        Self {
            local_tags: Mutex::new(tags.clone()),
            remote_tags: Mutex::new(tags),
            clean: true,
            reject_push: false,
        }
    }

    pub fn remote(&self) -> Vec<String> {
        self.remote_tags.lock().unwrap().clone()
    }

    pub fn local(&self) -> Vec<String> {
        self.local_tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn list_tags(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self.local())
    }

    async fn remote_tags(&self, _remote: &str) -> Result<Vec<String>, AdapterError> {
        Ok(self.remote())
    }

    async fn is_working_tree_clean(&self) -> Result<bool, AdapterError> {
        Ok(self.clean)
    }

    async fn head_commit(&self) -> Result<String, AdapterError> {
        Ok("abc1234".to_string())
    }

    async fn create_annotated_tag(&self, tag: &str, _target: &str, _message: &str) -> Result<(), AdapterError> {
        let mut tags = self.local_tags.lock().unwrap();
        if tags.iter().any(|t| t == tag) {
            return Err(AdapterError::AlreadyExists(tag.to_string()));
        }
        tags.push(tag.to_string());
        Ok(())
    }

    async fn push_tag(&self, _remote: &str, tag: &str) -> Result<(), AdapterError> {
        if self.reject_push {
            return Err(AdapterError::CommandFailed {
                program: "git".to_string(),
                code: 1,
                stderr: "remote rejected".to_string(),
            });
        }
        self.remote_tags.lock().unwrap().push(tag.to_string());
        Ok(())
    }

    async fn delete_local_tag(&self, tag: &str) -> Result<(), AdapterError> {
        self.local_tags.lock().unwrap().retain(|t| t != tag);
        Ok(())
    }
}

/// Registry that "builds" an image per version without side effects
#[derive(Default)]
pub struct FakeRegistry {
    pub built: Mutex<Vec<Version>>,
    pub aliases: Mutex<Vec<(String, ImageRef)>>,
    pub fail_build: bool,
}

#[async_trait]
impl ArtifactRegistry for FakeRegistry {
    async fn build(&self, release: &Release) -> Result<ImageRef, AdapterError> {
        if self.fail_build {
            return Err(AdapterError::CommandFailed {
                program: "docker".to_string(),
                code: 1,
                stderr: "build failed".to_string(),
            });
        }
        self.built.lock().unwrap().push(release.version);
        Ok(image(release.version))
    }

    async fn push(&self, image: &ImageRef) -> Result<ImageRef, AdapterError> {
        Ok(image.clone())
    }

    async fn alias(&self, image: &ImageRef, alias: &str) -> Result<ImageRef, AdapterError> {
        self.aliases.lock().unwrap().push((alias.to_string(), image.clone()));
        Ok(ImageRef::tagged(image.repository(), alias))
    }

    fn image_for(&self, version: &Version) -> ImageRef {
        image(*version)
    }
}

/// Both environments: deploys swap the running image, health answers for
/// whatever is running
#[derive(Default)]
pub struct FakeCluster {
    running: Mutex<HashMap<Environment, ImageRef>>,
    deploys: Mutex<Vec<(Environment, ImageRef)>>,

    /// Images that answer with a failing health status
    broken: Mutex<HashSet<ImageRef>>,

    /// Images that never answer
    silent: Mutex<HashSet<ImageRef>>,

    /// Environments whose deploys are accepted but never take effect
    frozen: Mutex<HashSet<Environment>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self, environment: Environment, image: ImageRef) {
        self.running.lock().unwrap().insert(environment, image);
    }

    pub fn break_image(&self, image: ImageRef) {
        self.broken.lock().unwrap().insert(image);
    }

    pub fn silence_image(&self, image: ImageRef) {
        self.silent.lock().unwrap().insert(image);
    }

    pub fn freeze(&self, environment: Environment) {
        self.frozen.lock().unwrap().insert(environment);
    }

    pub fn current(&self, environment: Environment) -> Option<ImageRef> {
        self.running.lock().unwrap().get(&environment).cloned()
    }

    pub fn deploys(&self) -> Vec<(Environment, ImageRef)> {
        self.deploys.lock().unwrap().clone()
    }

    pub fn deploys_to(&self, environment: Environment) -> Vec<ImageRef> {
        self.deploys()
            .into_iter()
            .filter(|(env, _)| *env == environment)
            .map(|(_, image)| image)
            .collect()
    }
}

#[async_trait]
impl DeployTarget for FakeCluster {
    async fn deploy(&self, environment: Environment, image: &ImageRef) -> Result<(), AdapterError> {
        self.deploys.lock().unwrap().push((environment, image.clone()));
        if !self.frozen.lock().unwrap().contains(&environment) {
            self.running(environment, image.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl HealthEndpoint for FakeCluster {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<HealthResponse, AdapterError> {
        let environment = if url == PROD_HEALTH {
            Environment::Production
        } else {
            Environment::Test
        };
        let Some(image) = self.current(environment) else {
            return Err(AdapterError::Http("connection refused".to_string()));
        };
        if self.silent.lock().unwrap().contains(&image) {
            return Err(AdapterError::Http("connection refused".to_string()));
        }

        let version = image.as_str().rsplit(':').next().unwrap_or_default().to_string();
        let (status_code, status) = if self.broken.lock().unwrap().contains(&image) {
            (503, "degraded")
        } else {
            (200, "ok")
        };
        let body = serde_json::json!({
            "status": status,
            "version": version,
            "timestamp": "2026-10-18T12:00:00Z",
        });
        Ok(HealthResponse {
            status_code,
            body: body.to_string(),
        })
    }
}

/// Orchestrator wired to fakes, collecting every event
pub struct Harness {
    pub orchestrator: PipelineOrchestrator,
    pub registry: Arc<FakeRegistry>,
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<dyn RunStore>,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryPersistence::new()), Arc::new(FakeCluster::new()))
    }

    pub fn with_store(store: Arc<dyn RunStore>, cluster: Arc<FakeCluster>) -> Self {
        let registry = Arc::new(FakeRegistry::default());
        let orchestrator = PipelineOrchestrator::new(
            settings(),
            registry.clone(),
            cluster.clone(),
            cluster.clone(),
            store.clone(),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        orchestrator.add_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            orchestrator,
            registry,
            cluster,
            store,
            events,
        }
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Stages entered by a run, in order
    pub fn stages_of(&self, run: &PipelineRun) -> Vec<PipelineStage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::StageChanged { run_id, to, .. } if run_id == run.id => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Put `version` through test and production successfully
    pub async fn ship(&self, version: Version) {
        let run = self.orchestrator.start_test_run(release(version)).await.unwrap();
        assert_eq!(run.stage, PipelineStage::Succeeded);
        let run = self
            .orchestrator
            .promote(Environment::Production, version, false)
            .await
            .unwrap();
        assert_eq!(run.stage, PipelineStage::Succeeded);
    }
}
