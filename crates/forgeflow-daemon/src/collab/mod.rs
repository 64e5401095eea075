//! Collaborator wiring for the orchestration runtime.
//!
//! The supervisor and pipelines only ever see the trait objects bundled in
//! [`Collaborators`]; concrete implementations live outside the core. The
//! [`memory`] module provides in-process implementations for tests and
//! development mode.

pub mod memory;

use std::sync::Arc;

use forgeflow_core::contracts::{Evaluator, Generator, QualityRunner, Registry, VersionControl};

/// Bundle of external collaborators injected into the runtime.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    pub generator: Arc<dyn Generator>,
    pub version_control: Arc<dyn VersionControl>,
    pub evaluator: Arc<dyn Evaluator>,
    pub quality: Arc<dyn QualityRunner>,
}
