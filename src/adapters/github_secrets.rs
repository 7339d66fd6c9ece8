//! Environment secrets stored through the GitHub CLI

use crate::adapters::{AdapterError, CommandRunner, SecretStore};
use crate::core::config::SecretsConfig;
use crate::core::Environment;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

/// Writes secrets with `gh secret set --env <environment>`
///
/// Values are passed on stdin, never on the command line.
#[derive(Debug, Clone)]
pub struct GithubSecretStore {
    runner: CommandRunner,
    repository: Option<String>,
}

impl GithubSecretStore {
    pub fn new(config: &SecretsConfig) -> Self {
        Self {
            runner: CommandRunner::new(config.gh.clone(), 60),
            repository: config.repository.clone(),
        }
    }

    fn set_args(&self, environment: Environment, name: &str) -> Vec<String> {
        let mut args = vec![
            "secret".to_string(),
            "set".to_string(),
            name.to_string(),
            "--env".to_string(),
            environment.to_string(),
        ];
        if let Some(repo) = &self.repository {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        args
    }
}

#[async_trait]
impl SecretStore for GithubSecretStore {
    async fn put(&self, environment: Environment, name: &str, value: &SecretString) -> Result<(), AdapterError> {
        self.runner
            .run_with_stdin(self.set_args(environment, name), Some(value.expose_secret().as_bytes()))
            .await?;
        info!("Stored secret {} in {}", name, environment);
        Ok(())
    }
}
