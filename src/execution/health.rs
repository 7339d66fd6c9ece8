//! Health probing - bounded polling of a service health endpoint

use crate::adapters::{HealthEndpoint, HealthResponse};
use crate::core::config::HealthSettings;
use crate::core::{FailureKind, Version};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Status values a service may report when it is ready
const HEALTHY_STATUSES: [&str; 3] = ["ok", "healthy", "pass"];

/// Body of a health endpoint answer
///
/// A well-formed acknowledgement carries a status and at least one freshness
/// field. Anything else is treated as no answer at all.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,

    #[serde(default)]
    pub started_at: Option<serde_json::Value>,
}

impl HealthReport {
    /// Parse a body, requiring a freshness field
    pub fn parse(body: &str) -> Result<Self, String> {
        let report: HealthReport = serde_json::from_str(body).map_err(|e| format!("invalid health body: {}", e))?;
        if report.version.is_none() && report.timestamp.is_none() && report.started_at.is_none() {
            return Err("health body has no version, timestamp or started_at".to_string());
        }
        Ok(report)
    }

    pub fn reports_healthy(&self) -> bool {
        let status = self.status.to_ascii_lowercase();
        HEALTHY_STATUSES.contains(&status.as_str())
    }
}

/// What a single poll saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Healthy { version: Option<String> },

    /// A previous instance is still answering
    Stale { reported: String, expected: Version },

    /// Well-formed answer that is not healthy
    Unhealthy { status_code: u16, status: String },

    /// Reachable, but not a health acknowledgement
    Malformed { status_code: u16, reason: String },

    Unreachable(String),
}

impl Observation {
    /// Classify a raw response against the version being rolled out
    pub fn classify(response: &HealthResponse, expected: Option<&Version>) -> Self {
        let report = match HealthReport::parse(&response.body) {
            Ok(report) => report,
            Err(reason) => {
                return Observation::Malformed {
                    status_code: response.status_code,
                    reason,
                }
            }
        };

        if !(200..300).contains(&response.status_code) || !report.reports_healthy() {
            return Observation::Unhealthy {
                status_code: response.status_code,
                status: report.status,
            };
        }

        if let (Some(expected), Some(reported)) = (expected, report.version.as_deref()) {
            match Version::parse_tag(reported.trim()) {
                Ok(version) if version != *expected => {
                    return Observation::Stale {
                        reported: reported.to_string(),
                        expected: *expected,
                    }
                }
                Ok(_) => {}
                Err(_) => debug!("Health version {:?} is not a release version, not comparing", reported),
            }
        }

        Observation::Healthy {
            version: report.version,
        }
    }

    /// The target answered with a well-formed acknowledgement
    pub fn is_acknowledgement(&self) -> bool {
        matches!(
            self,
            Observation::Healthy { .. } | Observation::Stale { .. } | Observation::Unhealthy { .. }
        )
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Healthy { version: Some(v) } => write!(f, "healthy ({})", v),
            Observation::Healthy { version: None } => write!(f, "healthy"),
            Observation::Stale { reported, expected } => {
                write!(f, "stale: serving {}, expected {}", reported, expected)
            }
            Observation::Unhealthy { status_code, status } => {
                write!(f, "unhealthy: HTTP {} status {:?}", status_code, status)
            }
            Observation::Malformed { status_code, reason } => write!(f, "HTTP {}: {}", status_code, reason),
            Observation::Unreachable(reason) => write!(f, "unreachable: {}", reason),
        }
    }
}

/// One poll, reported to the caller as it happens
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub attempt: u32,
    pub observation: Observation,
}

/// Final decision of a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,

    /// Budget spent without a single well-formed acknowledgement
    TimedOut { reason: String },

    /// Budget spent; the service answered but never healthy and current
    Unhealthy { reason: String },
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }

    /// Run failure kind for a negative verdict
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            HealthVerdict::Healthy => None,
            HealthVerdict::TimedOut { .. } => Some(FailureKind::DeployTimeout),
            HealthVerdict::Unhealthy { .. } => Some(FailureKind::Unhealthy),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::TimedOut { reason } | HealthVerdict::Unhealthy { reason } => reason,
        }
    }
}

/// Outcome of a probe with the number of polls it took
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub verdict: HealthVerdict,
    pub attempts: u32,
}

/// Polls a health endpoint until healthy or out of budget
///
/// Always terminates: the loop is bounded by `budget` and every request by
/// the smaller of `request_timeout` and the remaining budget.
#[derive(Clone)]
pub struct HealthProbe {
    endpoint: Arc<dyn HealthEndpoint>,
}

impl HealthProbe {
    pub fn new(endpoint: Arc<dyn HealthEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Poll `url` every `poll_interval` for at most `budget`
    ///
    /// `expected` is the version being rolled out; a healthy answer reporting
    /// another version does not count. `on_attempt` sees every poll.
    pub async fn check<F>(
        &self,
        url: &str,
        settings: &HealthSettings,
        expected: Option<&Version>,
        mut on_attempt: F,
    ) -> ProbeReport
    where
        F: FnMut(&ProbeAttempt) + Send,
    {
        let deadline = Instant::now() + settings.budget;
        let mut attempts = 0u32;
        let mut acknowledged = false;

        let last = loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = settings.request_timeout.min(remaining);

            let observation = match tokio::time::timeout(timeout, self.endpoint.fetch(url, timeout)).await {
                Ok(Ok(response)) => Observation::classify(&response, expected),
                Ok(Err(e)) => Observation::Unreachable(e.to_string()),
                Err(_) => Observation::Unreachable(format!("no response within {}ms", timeout.as_millis())),
            };
            debug!("Health poll {} of {}: {}", attempts, url, observation);

            let attempt = ProbeAttempt {
                attempt: attempts,
                observation: observation.clone(),
            };
            on_attempt(&attempt);

            if matches!(observation, Observation::Healthy { .. }) {
                info!("{} healthy after {} attempt(s)", url, attempts);
                return ProbeReport {
                    verdict: HealthVerdict::Healthy,
                    attempts,
                };
            }

            acknowledged |= observation.is_acknowledgement();

            if Instant::now() + settings.poll_interval >= deadline {
                break observation.to_string();
            }
            tokio::time::sleep(settings.poll_interval).await;
        };

        let verdict = if acknowledged {
            HealthVerdict::Unhealthy {
                reason: format!("not healthy after {} attempt(s); last: {}", attempts, last),
            }
        } else {
            HealthVerdict::TimedOut {
                reason: format!(
                    "no health acknowledgement within {}s ({} attempt(s)); last: {}",
                    settings.budget.as_secs(),
                    attempts,
                    last
                ),
            }
        };
        warn!("{} failed health check: {}", url, verdict.reason());

        ProbeReport { verdict, attempts }
    }
}
