//! Work requests, lineage, and pipeline outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheduling priority of a work request.
///
/// Ordering is highest-first so a plain `min_by_key`/sort on the derived
/// order picks `High` before `Normal` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A request for one unit of work, delivered to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub unit_id: String,
    /// Which service raised the request (scanner, pipeline, operator, ...).
    pub source_service: String,
    pub reason: String,
    pub priority: Priority,
    /// Enqueue timestamp in milliseconds; stamped by the supervisor when zero.
    #[serde(default)]
    pub timestamp: u64,
    /// Free-form request context (e.g. `"quality_gate": true`).
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl WorkRequest {
    /// Minimal normal-priority request used by scanners and pipelines.
    pub fn new(unit_id: impl Into<String>, source_service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            source_service: source_service.into(),
            reason: reason.into(),
            priority: Priority::Normal,
            timestamp: 0,
            context: BTreeMap::new(),
        }
    }

    /// Same request at a different priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// One unit reported by the registry's staleness scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleUnit {
    pub unit_id: String,
    /// Registry marked the unit urgent; the supervisor promotes it from
    /// low to normal priority.
    #[serde(default)]
    pub urgent: bool,
}

/// Dependency lineage of a unit, closest parent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageInfo {
    pub unit_id: String,
    /// Ordered parents, closest first.
    pub parents: Vec<String>,
    pub depth: u32,
}

/// Registry view of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDetails {
    pub exists: bool,
    pub status: Option<String>,
    pub artifact_ref: Option<String>,
    pub parent_unit_id: Option<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
}

/// Registry status update written after persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub artifact_ref: Option<String>,
    pub branch_ref: Option<String>,
    pub status: String,
}

/// What kind of update the evaluator recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// The unit has no artifact yet.
    Create,
    /// The existing artifact is stale and must be rebuilt.
    Regenerate,
    /// Metadata-only refresh.
    Refresh,
}

/// Evaluator verdict on whether a unit needs work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub needs_update: bool,
    pub update_kind: Option<UpdateKind>,
    /// Confidence in percent, 0-100.
    pub confidence: u8,
    pub reason: String,
}

/// Terminal, inspectable result of one build pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub artifact_ref: Option<String>,
    pub branch_ref: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub dependents_discovered: Vec<String>,
}
