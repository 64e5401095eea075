//! Decisions, actions, and executor results.
//!
//! Every payload crossing an instance boundary is a tagged-union variant
//! validated at the boundary rather than an opaque blob.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A policy decision: an ordered list of actions plus optional finalization.
///
/// `decision_id` must be derived from injected logical time and seeded
/// randomness so that replays reproduce it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    /// Step or run that triggered this decision, if any.
    pub based_on: Option<String>,
    pub actions: Vec<Action>,
    /// When `true`, the workflow completes after the actions are applied.
    pub finalize: bool,
}

impl Decision {
    /// Fill in missing step IDs using a replay-safe ID source.
    ///
    /// Must be called before the decision is applied to state; the engine
    /// passes the substrate's deterministic ID generator here.
    pub fn assign_step_ids(&mut self, mut next_id: impl FnMut() -> String) {
        for action in &mut self.actions {
            match action {
                Action::RequestWork { step_id, .. } | Action::RequestApproval { step_id, .. } => {
                    if step_id.is_none() {
                        *step_id = Some(next_id());
                    }
                }
                Action::Annotate { .. } => {}
            }
        }
    }
}

/// One action inside a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Ask an executor to perform work of the given kind.
    RequestWork {
        work_kind: String,
        payload: Value,
        step_id: Option<String>,
    },
    /// Ask a human (or gate) to approve before the workflow continues.
    RequestApproval {
        payload: Value,
        step_id: Option<String>,
    },
    /// Write an artifact, last write wins.
    Annotate { key: String, value: Value },
}

/// Outcome status reported by an executor for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Fail,
    /// Work continues; the step stays in progress.
    Partial,
}

/// An artifact produced by an executor, merged into workflow state under
/// the key `"{artifact_type}:{reference}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub artifact_type: String,
    pub reference: String,
    pub value: Value,
}

/// Result delivered by the `agent_completed` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub artifacts: Vec<ResultArtifact>,
    #[serde(default)]
    pub payload: Value,
}
