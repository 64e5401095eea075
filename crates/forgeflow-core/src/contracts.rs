//! Collaborator contracts consumed by the orchestration runtime.
//!
//! Implementations are external to the core: the runtime only ever talks
//! to these traits, exchanged by value, so one bad collaborator can be
//! swapped without touching the state machines.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::quality::{CheckKind, CheckReport, RemediationTask};
use crate::request::{EvaluationOutcome, LineageInfo, StaleUnit, StatusUpdate, UnitDetails};

/// Unit registry: source of truth for unit metadata and lineage.
///
/// Consistency of the registry is outside the core's responsibility, which
/// is why the pipeline polls with a ceiling instead of trusting one read.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn query_details(&self, unit_id: &str) -> Result<UnitDetails>;

    /// Dependency lineage, closest parent first.
    async fn query_lineage(&self, unit_id: &str) -> Result<LineageInfo>;

    /// Read an artifact's content; `None` when it does not exist yet.
    async fn read_artifact(&self, artifact_ref: &str) -> Result<Option<String>>;

    async fn update_status(&self, unit_id: &str, update: StatusUpdate) -> Result<()>;

    /// Scan for stale units needing regeneration, with per-unit urgency.
    async fn scan_stale(&self) -> Result<Vec<StaleUnit>>;
}

/// Output of a successful generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub content: String,
    pub artifact_ref: String,
}

/// Artifact generator (typically an AI-model client).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        unit_id: &str,
        reason: &str,
        context: Option<&str>,
        parent_artifact: Option<&str>,
    ) -> Result<GenerationOutput>;
}

/// Receipt for a committed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub revision_id: String,
}

/// Version control collaborator committing persisted artifacts.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn commit(
        &self,
        unit_id: &str,
        artifact_ref: &str,
        branch: &str,
        message: &str,
    ) -> Result<CommitReceipt>;
}

/// Evaluator deciding whether a unit actually needs work before a pipeline
/// is spawned for it.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        unit_id: &str,
        existing_artifact: Option<&str>,
        parent_artifact: Option<&str>,
        external_meta: Option<&Value>,
    ) -> Result<EvaluationOutcome>;
}

/// Quality check runner and fixer backing the remediation loop.
///
/// The check algorithms' internals are out of scope; only the
/// pass/fail/coverage contract matters here.
#[async_trait]
pub trait QualityRunner: Send + Sync {
    async fn run_check(&self, kind: CheckKind, unit_path: &str) -> Result<CheckReport>;

    /// Apply one suggested fix. Best-effort; the caller re-runs all checks
    /// afterwards regardless.
    async fn apply_fix(&self, unit_path: &str, task: &RemediationTask) -> Result<()>;
}
