//! Pluggable decision policies.

use forgeflow_core::decision::{Decision, StepResult};
use forgeflow_core::workflow::WorkflowState;

use crate::substrate::DeterministicCtx;

/// Maps (state, last result) to the next decision.
///
/// Policies must source time and randomness exclusively from the injected
/// context; anything else breaks replay determinism. Returning `None`
/// means "nothing to do", which is how signal-driven workflows idle.
pub trait Policy: Send {
    fn decide(
        &mut self,
        state: &WorkflowState,
        last_result: Option<&StepResult>,
        ctx: &mut DeterministicCtx,
    ) -> Option<Decision>;
}

impl<F> Policy for F
where
    F: FnMut(&WorkflowState, Option<&StepResult>, &mut DeterministicCtx) -> Option<Decision>
        + Send,
{
    fn decide(
        &mut self,
        state: &WorkflowState,
        last_result: Option<&StepResult>,
        ctx: &mut DeterministicCtx,
    ) -> Option<Decision> {
        self(state, last_result, ctx)
    }
}

/// Build a decision ID from the injected context.
///
/// Derived from logical time plus seeded randomness, never host time, so
/// replays reproduce the same IDs.
pub fn next_decision_id(ctx: &mut DeterministicCtx) -> String {
    let at = ctx.now();
    ctx.next_id(&format!("decision-{at}"))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decision_ids_replay_identically() {
        let mut a = DeterministicCtx::new(11);
        let mut b = DeterministicCtx::new(11);
        a.tick();
        b.tick();
        assert_eq!(next_decision_id(&mut a), next_decision_id(&mut b));
    }

    #[test]
    fn closures_are_policies() {
        let mut policy = |_state: &WorkflowState,
                          _last: Option<&StepResult>,
                          _ctx: &mut DeterministicCtx| None::<Decision>;
        let state = WorkflowState::new("unit");
        let mut ctx = DeterministicCtx::new(0);
        assert!(Policy::decide(&mut policy, &state, None, &mut ctx).is_none());
    }
}
