//! Policy-driven decision engine.
//!
//! One engine instance exclusively owns one [`WorkflowState`]. Signals are
//! processed strictly in arrival order, one at a time; "what next" is
//! delegated to the pluggable [`Policy`]. Once the event log reaches the
//! configured threshold the engine re-enters through a checkpoint: steps,
//! artifacts, and status survive, the log is trimmed to a single synthetic
//! boot decision.

mod policy;

pub use policy::{Policy, next_decision_id};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use forgeflow_core::decision::{Decision, StepResult};
use forgeflow_core::workflow::{WorkflowState, WorkflowStatus};

use crate::substrate::{CtxSnapshot, DeterministicCtx};

/// Signal channel depth per engine instance.
const SIGNAL_BUFFER: usize = 64;

/// Errors from the engine handle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine task has shut down and its channel is closed.
    #[error("Decision engine for unit is no longer running")]
    Closed,
}

/// Signals accepted by a decision engine instance.
#[derive(Debug)]
pub enum EngineSignal {
    /// An executor finished (or progressed) the referenced step.
    AgentCompleted { step_id: String, result: StepResult },
    /// Apply an externally produced decision.
    ApplyDecision { decision: Decision },
    /// Approve a pending approval step.
    Approve { step_id: String },
    /// Cancel the workflow.
    Cancel { reason: String },
    /// Application-defined event, recorded in the log.
    Custom { event_type: String, payload: Value },
    /// Query an immutable snapshot of current state.
    Query {
        reply: oneshot::Sender<WorkflowState>,
    },
}

/// Serializable engine checkpoint: outer snapshot plus context snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCheckpoint {
    pub state: WorkflowState,
    pub ctx: CtxSnapshot,
    pub checkpoints: u64,
}

/// Single-workflow decision engine.
///
/// The struct itself is synchronous and deterministic; [`spawn`] wraps it
/// in a tokio task that drains a signal channel. Tests drive
/// [`DecisionEngine::handle_signal`] directly for byte-identical replays.
pub struct DecisionEngine {
    state: WorkflowState,
    ctx: DeterministicCtx,
    policy: Option<Box<dyn Policy>>,
    max_events_before_checkpoint: usize,
    checkpoints: u64,
}

impl DecisionEngine {
    /// Create an engine for a fresh workflow.
    pub fn new(unit_id: impl Into<String>, seed: u64, max_events_before_checkpoint: usize) -> Self {
        Self {
            state: WorkflowState::new(unit_id),
            ctx: DeterministicCtx::new(seed),
            policy: None,
            max_events_before_checkpoint,
            checkpoints: 0,
        }
    }

    /// Restore an engine from a checkpoint snapshot.
    pub fn from_checkpoint(checkpoint: EngineCheckpoint, max_events_before_checkpoint: usize) -> Self {
        let mut ctx = DeterministicCtx::from_snapshot(&checkpoint.ctx);
        let state =
            WorkflowState::continued_from(&checkpoint.state, checkpoint.checkpoints, ctx.tick());
        Self {
            state,
            ctx,
            policy: None,
            max_events_before_checkpoint,
            checkpoints: checkpoint.checkpoints,
        }
    }

    /// Attach a policy consulted after every completed step.
    #[must_use]
    pub fn with_policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Immutable snapshot of current workflow state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Number of checkpoint re-entries so far.
    pub const fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    /// Consume the engine, returning the final state.
    pub fn into_state(self) -> WorkflowState {
        self.state
    }

    /// Process one signal. Never fails: malformed or unknown references
    /// are logged no-ops, per the error taxonomy.
    pub fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::AgentCompleted { step_id, result } => {
                let at = self.ctx.tick();
                self.state.apply_step_result(&step_id, &result, at);
                self.consult_policy(Some(&result));
            }
            EngineSignal::ApplyDecision { decision } => {
                self.apply_decision(decision);
            }
            EngineSignal::Approve { step_id } => {
                let at = self.ctx.tick();
                self.state.apply_approval(&step_id, at);
            }
            EngineSignal::Cancel { reason } => {
                let at = self.ctx.tick();
                self.state.apply_cancel(&reason, at);
                info!(unit_id = %self.state.unit_id, reason, "Workflow cancelled");
            }
            EngineSignal::Custom {
                event_type,
                payload,
            } => {
                let at = self.ctx.tick();
                self.state.apply_custom(&event_type, payload, at);
            }
            EngineSignal::Query { reply } => {
                // Queries never mutate; dropped receivers are fine.
                let _ = reply.send(self.state.clone());
                return;
            }
        }
        self.maybe_checkpoint();
    }

    fn apply_decision(&mut self, mut decision: Decision) {
        if decision.decision_id.is_empty() {
            warn!(unit_id = %self.state.unit_id, "Decision without an ID, ignoring");
            return;
        }
        decision.assign_step_ids(|| self.ctx.next_id("step"));
        let at = self.ctx.tick();
        self.state.apply_decision(&decision, at);
    }

    fn consult_policy(&mut self, last_result: Option<&StepResult>) {
        if self.state.status != WorkflowStatus::Running {
            return;
        }
        let Some(mut policy) = self.policy.take() else {
            return;
        };
        let decision = policy.decide(&self.state, last_result, &mut self.ctx);
        self.policy = Some(policy);

        if let Some(decision) = decision {
            debug!(
                unit_id = %self.state.unit_id,
                decision_id = %decision.decision_id,
                "Policy produced a decision"
            );
            self.apply_decision(decision);
        }
    }

    /// Re-enter through a checkpoint once the log is long enough.
    fn maybe_checkpoint(&mut self) {
        if self.state.log.len() < self.max_events_before_checkpoint {
            return;
        }
        let checkpoint = self.checkpoint();
        info!(
            unit_id = %self.state.unit_id,
            checkpoint = checkpoint.checkpoints,
            trimmed_events = self.state.log.len(),
            "Engine checkpoint: trimming log and re-entering"
        );
        let restored = Self::from_checkpoint(checkpoint, self.max_events_before_checkpoint);
        self.state = restored.state;
        self.ctx = restored.ctx;
        self.checkpoints = restored.checkpoints;
    }

    /// Build a serializable checkpoint of the current instant.
    pub fn checkpoint(&mut self) -> EngineCheckpoint {
        EngineCheckpoint {
            state: self.state.clone(),
            ctx: self.ctx.snapshot(),
            checkpoints: self.checkpoints + 1,
        }
    }
}

/// Cloneable handle delivering signals to a spawned engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineSignal>,
}

impl EngineHandle {
    pub async fn agent_completed(&self, step_id: &str, result: StepResult) -> Result<(), EngineError> {
        self.send(EngineSignal::AgentCompleted {
            step_id: step_id.to_string(),
            result,
        })
        .await
    }

    pub async fn apply_decision(&self, decision: Decision) -> Result<(), EngineError> {
        self.send(EngineSignal::ApplyDecision { decision }).await
    }

    pub async fn approve(&self, step_id: &str) -> Result<(), EngineError> {
        self.send(EngineSignal::Approve {
            step_id: step_id.to_string(),
        })
        .await
    }

    pub async fn cancel(&self, reason: &str) -> Result<(), EngineError> {
        self.send(EngineSignal::Cancel {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn custom(&self, event_type: &str, payload: Value) -> Result<(), EngineError> {
        self.send(EngineSignal::Custom {
            event_type: event_type.to_string(),
            payload,
        })
        .await
    }

    /// Immutable snapshot of current workflow state.
    pub async fn current_state(&self) -> Result<WorkflowState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineSignal::Query { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    async fn send(&self, signal: EngineSignal) -> Result<(), EngineError> {
        self.tx.send(signal).await.map_err(|_| EngineError::Closed)
    }
}

/// Spawn an engine as a tokio task draining its signal channel.
///
/// The task ends when every handle is dropped, yielding the final state.
pub fn spawn(engine: DecisionEngine) -> (EngineHandle, JoinHandle<WorkflowState>) {
    let (tx, mut rx) = mpsc::channel(SIGNAL_BUFFER);
    let task = tokio::spawn(async move {
        let mut engine = engine;
        while let Some(signal) = rx.recv().await {
            engine.handle_signal(signal);
        }
        engine.into_state()
    });
    (EngineHandle { tx }, task)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use forgeflow_core::decision::{Action, ResultStatus};
    use forgeflow_core::workflow::StepStatus;
    use serde_json::json;

    fn ok_result() -> StepResult {
        StepResult {
            status: ResultStatus::Ok,
            artifacts: vec![],
            payload: json!({}),
        }
    }

    fn request_work(decision_id: &str, step_id: Option<&str>) -> Decision {
        Decision {
            decision_id: decision_id.to_string(),
            based_on: None,
            actions: vec![Action::RequestWork {
                work_kind: "build".to_string(),
                payload: json!({}),
                step_id: step_id.map(str::to_string),
            }],
            finalize: false,
        }
    }

    #[test]
    fn missing_step_ids_come_from_the_substrate() {
        let mut engine = DecisionEngine::new("unit-a", 3, 100);
        engine.handle_signal(EngineSignal::ApplyDecision {
            decision: request_work("d1", None),
        });
        let (step_id, step) = engine.state().open_steps.iter().next().expect("one step");
        assert!(step_id.starts_with("step-"), "generated ID: {step_id}");
        assert_eq!(step.status, StepStatus::Waiting);
    }

    #[test]
    fn empty_decision_id_is_a_noop() {
        let mut engine = DecisionEngine::new("unit-a", 3, 100);
        engine.handle_signal(EngineSignal::ApplyDecision {
            decision: request_work("", Some("s1")),
        });
        assert!(engine.state().open_steps.is_empty());
        assert!(engine.state().log.is_empty());
    }

    #[test]
    fn policy_is_consulted_after_each_completed_step() {
        let policy = |state: &WorkflowState,
                      last: Option<&StepResult>,
                      ctx: &mut DeterministicCtx| {
            // Finalize once the first requested step reports OK.
            last.filter(|r| r.status == ResultStatus::Ok)?;
            if state.artifacts.contains_key("done") {
                return None;
            }
            Some(Decision {
                decision_id: next_decision_id(ctx),
                based_on: None,
                actions: vec![Action::Annotate {
                    key: "done".to_string(),
                    value: json!(true),
                }],
                finalize: true,
            })
        };

        let mut engine = DecisionEngine::new("unit-a", 3, 100).with_policy(policy);
        engine.handle_signal(EngineSignal::ApplyDecision {
            decision: request_work("d1", Some("s1")),
        });
        engine.handle_signal(EngineSignal::AgentCompleted {
            step_id: "s1".to_string(),
            result: ok_result(),
        });

        assert_eq!(engine.state().status, WorkflowStatus::Completed);
        assert_eq!(engine.state().artifacts.get("done"), Some(&json!(true)));
    }

    #[test]
    fn checkpoint_trims_log_and_preserves_state() {
        let mut engine = DecisionEngine::new("unit-a", 3, 5);
        engine.handle_signal(EngineSignal::ApplyDecision {
            decision: request_work("d1", Some("s1")),
        });
        for n in 0..6 {
            engine.handle_signal(EngineSignal::Custom {
                event_type: "tick".to_string(),
                payload: json!(n),
            });
        }

        assert_eq!(engine.checkpoints(), 1);
        assert!(engine.state().log.len() < 5, "log must be trimmed");
        assert!(engine.state().open_steps.contains_key("s1"));
        assert!(
            engine
                .state()
                .artifacts
                .contains_key(forgeflow_core::workflow::CONTINUED_FROM_KEY)
        );
    }

    #[test]
    fn replaying_signals_yields_byte_identical_state() {
        let run = || {
            let mut engine = DecisionEngine::new("unit-a", 42, 100);
            engine.handle_signal(EngineSignal::ApplyDecision {
                decision: request_work("d1", None),
            });
            let step_id = engine
                .state()
                .open_steps
                .keys()
                .next()
                .expect("step exists")
                .clone();
            engine.handle_signal(EngineSignal::AgentCompleted {
                step_id,
                result: ok_result(),
            });
            engine.handle_signal(EngineSignal::Custom {
                event_type: "note".to_string(),
                payload: json!({"k": "v"}),
            });
            serde_json::to_string(engine.state()).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn spawned_engine_answers_queries() {
        let engine = DecisionEngine::new("unit-a", 1, 100);
        let (handle, task) = spawn(engine);

        handle
            .apply_decision(request_work("d1", Some("s1")))
            .await
            .unwrap();
        handle.agent_completed("s1", ok_result()).await.unwrap();

        let state = handle.current_state().await.unwrap();
        assert_eq!(state.open_steps["s1"].status, StepStatus::Done);

        handle.cancel("shutting down test").await.unwrap();
        let state = handle.current_state().await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Cancelled);

        drop(handle);
        let final_state = task.await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Cancelled);
    }
}
