//! Deploy invocation through a configured command

use crate::adapters::{AdapterError, CommandRunner, DeployTarget};
use crate::core::config::EnvironmentsConfig;
use crate::core::{Environment, ImageRef};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

/// Runs a per-environment argv template to trigger a deploy
///
/// The command is expected to return once the deploy has been accepted; the
/// rollout itself is verified by health polling.
#[derive(Debug, Clone)]
pub struct CommandDeployTarget {
    commands: HashMap<Environment, Vec<String>>,
    timeouts: HashMap<Environment, u64>,
}

impl CommandDeployTarget {
    pub fn new(environments: &EnvironmentsConfig) -> Self {
        let commands = Environment::ALL
            .into_iter()
            .map(|env| (env, environments.get(env).deploy_command.clone()))
            .collect();
        let timeouts = Environment::ALL
            .into_iter()
            .map(|env| (env, environments.get(env).deploy_timeout_secs))
            .collect();

        Self { commands, timeouts }
    }

    /// Seconds the deploy command for `environment` may run
    pub fn timeout_secs(&self, environment: Environment) -> u64 {
        self.timeouts.get(&environment).copied().unwrap_or(300)
    }

    /// Render the argv for a deploy, replacing `{{ image }}` and
    /// `{{ environment }}` placeholders
    pub fn render(&self, environment: Environment, image: &ImageRef) -> Option<Vec<String>> {
        let template = self.commands.get(&environment)?;
        let variables = [
            ("image", image.as_str().to_string()),
            ("environment", environment.to_string()),
        ];

        Some(
            template
                .iter()
                .map(|arg| {
                    variables.iter().fold(arg.clone(), |acc, (key, value)| {
                        acc.replace(&format!("{{{{ {} }}}}", key), value)
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl DeployTarget for CommandDeployTarget {
    async fn deploy(&self, environment: Environment, image: &ImageRef) -> Result<(), AdapterError> {
        let argv = self.render(environment, image).ok_or_else(|| AdapterError::Spawn {
            program: "deploy".to_string(),
            reason: format!("no deploy command configured for {}", environment),
        })?;

        let (program, args) = argv.split_first().ok_or_else(|| AdapterError::Spawn {
            program: "deploy".to_string(),
            reason: format!("empty deploy command for {}", environment),
        })?;

        info!("Deploying {} to {} via {}", image, environment, program);
        CommandRunner::new(program.clone(), self.timeout_secs(environment))
            .run(args)
            .await?;
        Ok(())
    }
}
