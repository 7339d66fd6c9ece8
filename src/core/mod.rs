//! Core domain models
//!
//! Versions, releases, environments and the promotion run state machine.

pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod release;
pub mod state;
pub mod version;

pub use context::*;
pub use environment::*;
pub use release::*;
pub use state::*;
pub use version::*;
