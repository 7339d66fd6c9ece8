//! shipwright - release tagging and health-gated environment promotion

pub mod adapters;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod release;
pub mod secrets;

// Re-export commonly used types
pub use core::{BumpClass, DeploymentRecord, Environment, ImageRef, PipelineRun, PipelineStage, Release, Version};
pub use execution::{ExecutionEvent, OrchestratorSettings, PipelineOrchestrator};
pub use release::{ReleaseError, ReleaseManager};
pub use secrets::{SecretBundle, SecretPropagator, SecretSet};
