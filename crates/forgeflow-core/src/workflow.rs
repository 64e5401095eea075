//! Workflow state owned by a single decision engine instance.
//!
//! [`WorkflowState`] is mutated only through the `apply_*` methods so that
//! replaying an identical signal sequence with identical injected logical
//! times produces a byte-identical state. All collections are ordered
//! (`BTreeMap`) for the same reason, and every timestamp is a caller-supplied
//! logical time, never a wall clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::decision::{Action, Decision, ResultStatus, StepResult};

/// Monotonic logical timestamp injected by the substrate.
pub type LogicalTime = u64;

/// Artifact key under which checkpoint re-entry is recorded.
pub const CONTINUED_FROM_KEY: &str = "_continued_from";

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the workflow has reached a terminal status.
    ///
    /// A terminal workflow stays queryable but ignores mutating signals.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a single open step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Waiting,
    InProgress,
    Done,
    Failed,
    Blocked,
}

/// State of one requested unit of work inside a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// Work kind requested from the executor (or `"approval"`).
    pub kind: String,
    pub status: StepStatus,
    pub requested_at: LogicalTime,
    pub updated_at: LogicalTime,
    pub payload: Value,
}

/// Kind of event recorded in the workflow log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepCompleted,
    DecisionApplied,
    Approved,
    Cancelled,
    Finalized,
    Custom,
}

/// One ordered entry in the workflow event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: LogicalTime,
    pub kind: EventKind,
    pub data: Value,
}

/// Complete state of one workflow, exclusively owned by its engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub unit_id: String,
    pub status: WorkflowStatus,
    /// Open steps keyed by step ID.
    pub open_steps: BTreeMap<String, StepState>,
    /// Last-write-wins artifact map.
    pub artifacts: BTreeMap<String, Value>,
    /// Ordered event log; trimmed on checkpoint re-entry.
    pub log: Vec<LogEntry>,
}

impl WorkflowState {
    /// Create a fresh running workflow for the given unit.
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: WorkflowStatus::Running,
            open_steps: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    /// Rebuild state across a checkpoint boundary: steps, artifacts, and
    /// status survive; the log restarts with a single re-entry record.
    pub fn continued_from(prior: &Self, checkpoint: u64, at: LogicalTime) -> Self {
        let mut next = Self {
            unit_id: prior.unit_id.clone(),
            status: prior.status,
            open_steps: prior.open_steps.clone(),
            artifacts: prior.artifacts.clone(),
            log: Vec::new(),
        };
        next.artifacts.insert(
            CONTINUED_FROM_KEY.to_string(),
            json!({ "checkpoint": checkpoint, "at": at }),
        );
        next.record(
            at,
            EventKind::DecisionApplied,
            json!({ "boot": true, "checkpoint": checkpoint }),
        );
        next
    }

    /// Append an entry to the ordered event log.
    pub fn record(&mut self, at: LogicalTime, kind: EventKind, data: Value) {
        self.log.push(LogEntry { at, kind, data });
    }

    /// Apply a completed-work result to the referenced step.
    ///
    /// Never fails: an unknown step ID is a logged no-op. Result artifacts
    /// are merged under `"{type}:{ref}"` keys, last write wins.
    pub fn apply_step_result(&mut self, step_id: &str, result: &StepResult, at: LogicalTime) {
        if self.status.is_terminal() {
            warn!(unit_id = %self.unit_id, step_id, "Ignoring step result after terminal status");
            return;
        }

        match self.open_steps.get_mut(step_id) {
            Some(step) => {
                step.status = match result.status {
                    ResultStatus::Ok => StepStatus::Done,
                    ResultStatus::Fail => StepStatus::Failed,
                    ResultStatus::Partial => StepStatus::InProgress,
                };
                step.updated_at = at;
            }
            None => {
                warn!(unit_id = %self.unit_id, step_id, "Step result for unknown step, ignoring");
                return;
            }
        }

        for artifact in &result.artifacts {
            let key = format!("{}:{}", artifact.artifact_type, artifact.reference);
            self.artifacts.insert(key, artifact.value.clone());
        }

        self.record(
            at,
            EventKind::StepCompleted,
            json!({ "step_id": step_id, "result": result.status }),
        );
    }

    /// Apply a decision: actions in order, then optional finalization.
    ///
    /// Callers must have normalized the decision first so that every
    /// `RequestWork`/`RequestApproval` action carries a step ID.
    pub fn apply_decision(&mut self, decision: &Decision, at: LogicalTime) {
        if self.status.is_terminal() {
            warn!(
                unit_id = %self.unit_id,
                decision_id = %decision.decision_id,
                "Ignoring decision after terminal status"
            );
            return;
        }

        for action in &decision.actions {
            match action {
                Action::RequestWork {
                    work_kind,
                    payload,
                    step_id,
                } => {
                    let Some(id) = step_id else {
                        warn!(
                            unit_id = %self.unit_id,
                            decision_id = %decision.decision_id,
                            "RequestWork without a step ID, skipping action"
                        );
                        continue;
                    };
                    self.upsert_step(id.clone(), work_kind.clone(), payload.clone(), at);
                }
                Action::RequestApproval { payload, step_id } => {
                    let Some(id) = step_id else {
                        warn!(
                            unit_id = %self.unit_id,
                            decision_id = %decision.decision_id,
                            "RequestApproval without a step ID, skipping action"
                        );
                        continue;
                    };
                    self.upsert_step(id.clone(), "approval".to_string(), payload.clone(), at);
                    self.status = WorkflowStatus::AwaitingApproval;
                }
                Action::Annotate { key, value } => {
                    self.artifacts.insert(key.clone(), value.clone());
                }
            }
        }

        self.record(
            at,
            EventKind::DecisionApplied,
            json!({
                "decision_id": decision.decision_id,
                "based_on": decision.based_on,
                "actions": decision.actions.len(),
            }),
        );

        if decision.finalize {
            self.status = WorkflowStatus::Completed;
            self.record(at, EventKind::Finalized, json!({ "decision_id": decision.decision_id }));
        }
    }

    /// Mark an approval step done; revert `AWAITING_APPROVAL` to `RUNNING`.
    pub fn apply_approval(&mut self, step_id: &str, at: LogicalTime) {
        if self.status.is_terminal() {
            warn!(unit_id = %self.unit_id, step_id, "Ignoring approval after terminal status");
            return;
        }

        let Some(step) = self.open_steps.get_mut(step_id) else {
            warn!(unit_id = %self.unit_id, step_id, "Approval for unknown step, ignoring");
            return;
        };
        step.status = StepStatus::Done;
        step.updated_at = at;

        if self.status == WorkflowStatus::AwaitingApproval {
            self.status = WorkflowStatus::Running;
        }
        self.record(at, EventKind::Approved, json!({ "step_id": step_id }));
    }

    /// Cancel the workflow, recording the reason.
    pub fn apply_cancel(&mut self, reason: &str, at: LogicalTime) {
        if self.status.is_terminal() {
            warn!(unit_id = %self.unit_id, reason, "Ignoring cancel after terminal status");
            return;
        }
        self.status = WorkflowStatus::Cancelled;
        self.record(at, EventKind::Cancelled, json!({ "reason": reason }));
    }

    /// Record an application-defined event.
    pub fn apply_custom(&mut self, event_type: &str, payload: Value, at: LogicalTime) {
        if self.status.is_terminal() {
            debug!(unit_id = %self.unit_id, event_type, "Ignoring custom event after terminal status");
            return;
        }
        self.record(at, EventKind::Custom, json!({ "event_type": event_type, "payload": payload }));
    }

    fn upsert_step(&mut self, step_id: String, kind: String, payload: Value, at: LogicalTime) {
        self.open_steps
            .entry(step_id)
            .and_modify(|step| {
                step.kind.clone_from(&kind);
                step.status = StepStatus::Waiting;
                step.payload = payload.clone();
                step.updated_at = at;
            })
            .or_insert(StepState {
                kind,
                status: StepStatus::Waiting,
                requested_at: at,
                updated_at: at,
                payload,
            });
    }
}
