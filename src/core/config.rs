//! Orchestrator configuration from YAML

use crate::core::Environment;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "shipwright.yaml";

/// Top-level configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipwrightConfig {
    /// Project name, used in logs and as the default image name
    pub name: String,

    #[serde(default)]
    pub release: ReleaseConfig,

    pub registry: RegistryConfig,

    pub environments: EnvironmentsConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub state: StateConfig,
}

/// Tagging policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Remote the tag is pushed to
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Refuse to release without explicit notes
    #[serde(default)]
    pub require_notes: bool,

    /// Path to the git binary
    #[serde(default = "default_git")]
    pub git: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            require_notes: false,
            git: default_git(),
        }
    }
}

/// Container registry and build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Image repository, e.g. `ghcr.io/acme/avatar`
    pub repository: String,

    /// Docker build context
    #[serde(default = "default_build_context")]
    pub build_context: String,

    /// Dockerfile relative to the build context
    #[serde(default)]
    pub dockerfile: Option<String>,

    /// Path to the docker binary
    #[serde(default = "default_docker")]
    pub docker: String,

    /// Timeout for a single build or push, in seconds
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    pub test: EnvironmentConfig,
    pub production: EnvironmentConfig,
}

impl EnvironmentsConfig {
    pub fn get(&self, environment: Environment) -> &EnvironmentConfig {
        match environment {
            Environment::Test => &self.test,
            Environment::Production => &self.production,
        }
    }
}

/// Per-environment deploy and health settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Base URL of the deployed service
    pub url: String,

    /// Health endpoint path appended to `url`
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// How long health polling may take before giving up
    #[serde(default)]
    pub health_budget_secs: Option<u64>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait after deploy before the first poll
    #[serde(default)]
    pub stabilization_secs: Option<u64>,

    /// Per-request timeout for a single health poll
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deploy command argv; `{{ image }}` and `{{ environment }}` are substituted
    pub deploy_command: Vec<String>,

    /// How long the deploy command may run before it counts as rejected
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    /// Mutable alias tag pushed after a healthy deploy
    #[serde(default)]
    pub latest_alias: Option<String>,
}

/// Credential store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Path to the gh binary
    #[serde(default = "default_gh")]
    pub gh: String,

    /// `owner/repo` for the secret store; current repository when absent
    #[serde(default)]
    pub repository: Option<String>,

    /// Reuse test values for production when no production values are given
    #[serde(default)]
    pub mirror_test_to_production: bool,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            gh: default_gh(),
            repository: None,
            mirror_test_to_production: false,
        }
    }
}

/// Where run history and deployment records live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Resolved health-gating timings for one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub budget: Duration,
    pub poll_interval: Duration,
    pub stabilization: Duration,
    pub request_timeout: Duration,
}

/// Resolved runtime settings for one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub health_url: String,
    pub health: HealthSettings,
    pub latest_alias: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_gh() -> String {
    "gh".to_string()
}

fn default_build_context() -> String {
    ".".to_string()
}

fn default_registry_timeout() -> u64 {
    1800
}

fn default_health_path() -> String {
    "/api/health".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    5
}

fn default_deploy_timeout() -> u64 {
    300
}

impl ShipwrightConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ShipwrightConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.registry.repository.trim().is_empty() {
            anyhow::bail!("registry.repository must not be empty");
        }
        if self.registry.repository.contains(char::is_whitespace) {
            anyhow::bail!("registry.repository must not contain whitespace");
        }

        for environment in Environment::ALL {
            let env = self.environments.get(environment);

            if env.url.trim().is_empty() {
                anyhow::bail!("environments.{}.url must not be empty", environment);
            }
            if !env.url.starts_with("http://") && !env.url.starts_with("https://") {
                anyhow::bail!(
                    "environments.{}.url must be an http(s) URL, got '{}'",
                    environment,
                    env.url
                );
            }
            if env.deploy_command.is_empty() {
                anyhow::bail!("environments.{}.deploy_command must not be empty", environment);
            }
            if env.deploy_timeout_secs == 0 {
                anyhow::bail!("environments.{}.deploy_timeout_secs must be positive", environment);
            }

            let settings = self.environment(environment);
            if settings.health.budget.is_zero() {
                anyhow::bail!("environments.{}.health_budget_secs must be positive", environment);
            }
            if settings.health.poll_interval.is_zero() {
                anyhow::bail!("environments.{}.poll_interval_secs must be positive", environment);
            }
            if settings.health.poll_interval >= settings.health.budget {
                anyhow::bail!(
                    "environments.{}: poll interval ({}s) must be shorter than the health budget ({}s)",
                    environment,
                    settings.health.poll_interval.as_secs(),
                    settings.health.budget.as_secs()
                );
            }
        }

        Ok(())
    }

    /// Resolve the effective settings of an environment, applying the
    /// per-environment defaults (short test budget, longer production budget)
    pub fn environment(&self, environment: Environment) -> EnvironmentSettings {
        let env = self.environments.get(environment);
        let (default_budget, default_stabilization) = match environment {
            Environment::Test => (180, 30),
            Environment::Production => (600, 60),
        };

        EnvironmentSettings {
            health_url: format!(
                "{}/{}",
                env.url.trim_end_matches('/'),
                env.health_path.trim_start_matches('/')
            ),
            health: HealthSettings {
                budget: Duration::from_secs(env.health_budget_secs.unwrap_or(default_budget)),
                poll_interval: Duration::from_secs(env.poll_interval_secs),
                stabilization: Duration::from_secs(env.stabilization_secs.unwrap_or(default_stabilization)),
                request_timeout: Duration::from_secs(env.request_timeout_secs),
            },
            latest_alias: env
                .latest_alias
                .clone()
                .unwrap_or_else(|| format!("{}-latest", environment)),
        }
    }

    /// Path of the state database, defaulting to the platform data dir
    pub fn state_path(&self) -> PathBuf {
        if let Some(path) = &self.state.path {
            return path.clone();
        }
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("shipwright").join(format!("{}.db", self.name))
    }
}
