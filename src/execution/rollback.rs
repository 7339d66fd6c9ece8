//! Rollback to the last-known-good deployment

use crate::adapters::DeployTarget;
use crate::core::config::EnvironmentSettings;
use crate::core::error::RollbackError;
use crate::core::{DeploymentRecord, ImageRef, Version};
use crate::execution::health::{HealthProbe, ProbeAttempt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A verified rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub image: ImageRef,
    pub version: Option<Version>,
    pub attempts: u32,
}

/// Redeploys `last_known_good` and health-checks it like any forward deploy
///
/// Reads the deployment record but never writes it; the caller applies the
/// outcome.
#[derive(Clone)]
pub struct RollbackController {
    deployer: Arc<dyn DeployTarget>,
    probe: HealthProbe,
}

impl RollbackController {
    pub fn new(deployer: Arc<dyn DeployTarget>, probe: HealthProbe) -> Self {
        Self { deployer, probe }
    }

    pub async fn rollback<F>(
        &self,
        record: &DeploymentRecord,
        settings: &EnvironmentSettings,
        on_attempt: F,
    ) -> Result<RollbackOutcome, RollbackError>
    where
        F: FnMut(&ProbeAttempt) + Send,
    {
        let environment = record.environment;
        let Some(target) = record.last_known_good.clone() else {
            error!("Cannot roll back {}: no last-known-good deployment", environment);
            return Err(RollbackError::NoKnownGoodState(environment));
        };
        let version = record.last_known_good_version;

        info!("Rolling back {} to {}", environment, target);
        self.deployer
            .deploy(environment, &target)
            .await
            .map_err(|e| RollbackError::DeployRejected {
                environment,
                reason: e.to_string(),
            })?;

        tokio::time::sleep(settings.health.stabilization).await;

        let report = self
            .probe
            .check(&settings.health_url, &settings.health, version.as_ref(), on_attempt)
            .await;

        if !report.verdict.is_healthy() {
            warn!("Rollback of {} to {} is not healthy", environment, target);
            return Err(RollbackError::Unhealthy {
                environment,
                image: target.to_string(),
                reason: report.verdict.reason().to_string(),
            });
        }

        info!("Rolled back {} to {}", environment, target);
        Ok(RollbackOutcome {
            image: target,
            version,
            attempts: report.attempts,
        })
    }
}
