//! Pipeline execution: orchestration, health gating, rollback and admission

pub mod engine;
pub mod health;
pub mod rollback;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEvent, OrchestratorSettings, PipelineOrchestrator};
pub use health::{HealthProbe, HealthReport, HealthVerdict, Observation, ProbeAttempt, ProbeReport};
pub use rollback::{RollbackController, RollbackOutcome};
pub use scheduler::{RunScheduler, Slot};
