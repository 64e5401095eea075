//! Narrow interface to the durable-execution substrate.
//!
//! Everything a state machine needs from its environment lives here:
//! logical time, seeded randomness, replay-safe IDs, and the bounded-retry
//! activity runner. Signal delivery and child spawning stay with tokio
//! channels and tasks; this module only owns the deterministic parts.

use std::future::Future;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use forgeflow_core::backoff::FibonacciBackoff;
use forgeflow_core::error::{Error, Result};

/// Deterministic source of time, randomness, and IDs for one instance.
///
/// Two contexts built from the same seed and driven through the same call
/// sequence produce identical observations, which is what makes signal
/// replay reproducible. Never mix host time or entropy into this path.
#[derive(Debug)]
pub struct DeterministicCtx {
    now: u64,
    id_counter: u64,
    seed: u64,
    rng: StdRng,
}

/// Serializable snapshot of a [`DeterministicCtx`], taken at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtxSnapshot {
    pub now: u64,
    pub id_counter: u64,
    /// Seed for the restored RNG, drawn from the live RNG at snapshot time.
    pub reseed: u64,
}

impl DeterministicCtx {
    /// Build a fresh context from a recorded seed.
    pub fn new(seed: u64) -> Self {
        Self {
            now: 0,
            id_counter: 0,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restore a context across a checkpoint boundary.
    pub fn from_snapshot(snapshot: &CtxSnapshot) -> Self {
        Self {
            now: snapshot.now,
            id_counter: snapshot.id_counter,
            seed: snapshot.reseed,
            rng: StdRng::seed_from_u64(snapshot.reseed),
        }
    }

    /// Snapshot the context for a checkpoint. Advances the RNG once so the
    /// restored context never replays already-consumed randomness.
    pub fn snapshot(&mut self) -> CtxSnapshot {
        CtxSnapshot {
            now: self.now,
            id_counter: self.id_counter,
            reseed: self.rng.random(),
        }
    }

    /// Advance and return the logical clock. Each observed event gets a
    /// strictly increasing timestamp.
    pub fn tick(&mut self) -> u64 {
        self.now += 1;
        self.now
    }

    /// Current logical time without advancing.
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Seeded random value.
    pub fn random_u64(&mut self) -> u64 {
        self.rng.random()
    }

    /// Replay-safe unique identifier with the given prefix.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        let id = Uuid::from_u64_pair(self.random_u64(), self.id_counter);
        format!("{prefix}-{id}")
    }

    /// Seed this context was built from (recorded in checkpoints and logs).
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

/// Retry policy for one external activity call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Hard per-attempt timeout.
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(120),
            backoff_base: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// Run an external call with bounded retries and a hard per-call timeout.
///
/// Only [`Error::is_retryable`] failures are retried; a timed-out attempt
/// counts as transient. Exhausted budgets surface as an error for the
/// enclosing pipeline step to fold into its `{success: false}` result,
/// never as a panic.
pub async fn run_activity<T, F, Fut>(name: &str, policy: &RetryPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = FibonacciBackoff::with_base(policy.backoff_base, policy.backoff_cap);
    let mut last_error = Error::TransientProvider(format!("activity {name} never ran"));

    for attempt in 1..=policy.max_attempts.max(1) {
        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => {
                debug!(activity = name, attempt, "Activity succeeded");
                return Ok(value);
            }
            Ok(Err(err)) if err.is_retryable() => {
                warn!(activity = name, attempt, error = %err, "Retryable activity failure");
                last_error = err;
            }
            Ok(Err(err)) => {
                warn!(activity = name, attempt, error = %err, "Non-retryable activity failure");
                return Err(err);
            }
            Err(_) => {
                warn!(activity = name, attempt, "Activity attempt timed out");
                last_error = Error::TransientProvider(format!(
                    "activity {name} timed out after {:?}",
                    policy.timeout
                ));
            }
        }

        if attempt < policy.max_attempts
            && let Some(delay) = backoff.next()
        {
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_error)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn same_seed_same_observations() {
        let mut a = DeterministicCtx::new(42);
        let mut b = DeterministicCtx::new(42);

        for _ in 0..5 {
            assert_eq!(a.tick(), b.tick());
            assert_eq!(a.random_u64(), b.random_u64());
            assert_eq!(a.next_id("step"), b.next_id("step"));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = DeterministicCtx::new(1);
        let mut b = DeterministicCtx::new(2);
        assert_ne!(a.next_id("step"), b.next_id("step"));
    }

    #[test]
    fn snapshot_round_trip_preserves_clock_and_counter() {
        let mut ctx = DeterministicCtx::new(7);
        ctx.tick();
        ctx.tick();
        ctx.next_id("x");

        let snapshot = ctx.snapshot();
        let mut restored = DeterministicCtx::from_snapshot(&snapshot);
        assert_eq!(restored.now(), 2);
        assert_eq!(restored.tick(), 3);
        // Counter keeps increasing, so IDs never collide across a restart.
        let id = restored.next_id("x");
        assert!(id.starts_with("x-"));
        assert_eq!(restored.id_counter, 2);
    }

    #[test]
    fn restored_contexts_replay_identically() {
        let mut ctx = DeterministicCtx::new(7);
        ctx.next_id("a");
        let snapshot = ctx.snapshot();

        let mut r1 = DeterministicCtx::from_snapshot(&snapshot);
        let mut r2 = DeterministicCtx::from_snapshot(&snapshot);
        assert_eq!(r1.next_id("b"), r2.next_id("b"));
        assert_eq!(r1.random_u64(), r2.random_u64());
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            timeout: Duration::from_millis(50),
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn activity_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = run_activity("gen", &fast_policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::TransientProvider("blip".into()))
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn activity_stops_on_permanent_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = run_activity("gen", &fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::PermanentProvider("bad key".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::PermanentProvider(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activity_exhausts_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = run_activity("gen", &fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::TransientProvider("still down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn activity_times_out_slow_calls() {
        let result: Result<u32> = run_activity("gen", &fast_policy(1), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(result.is_err());
    }
}
