//! Forgeflow Daemon Library
//!
//! The orchestration runtime:
//! - Decision engine: policy-driven per-workflow state machine
//! - Service supervisor: queue, evaluation-before-spawn, child tracking
//! - Build pipeline: lineage-ordered generation with quality remediation
//! - Substrate: deterministic time/randomness/IDs and bounded-retry calls
//! - In-memory collaborators for tests and development mode

pub mod collab;
pub mod engine;
pub mod pipeline;
pub mod substrate;
pub mod supervisor;
