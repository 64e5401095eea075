//! Forgeflow Core Library
//!
//! Shared functionality for Forgeflow components:
//! - Workflow/decision contract types mutated only through apply paths
//! - Work request and pipeline result types
//! - Compliance scoring and remediation task model
//! - Fibonacci backoff generator
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod backoff;
pub mod config;
pub mod contracts;
pub mod decision;
pub mod error;
pub mod quality;
pub mod request;
pub mod tracing_init;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
