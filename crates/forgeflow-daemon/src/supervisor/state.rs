//! Supervisor-owned service state and its checkpoint snapshot.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use forgeflow_core::request::WorkRequest;

/// Lifecycle status of the supervisor singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
}

/// Counters exposed in checkpoint snapshots and shutdown summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_requests: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    /// Requests dropped by idempotent dedupe against a live child.
    pub total_skipped: u64,
}

/// Record of one failed unit; the supervisor keeps going regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub unit_id: String,
    pub error: String,
    pub retryable: bool,
    pub attempts: u32,
}

/// State owned exclusively by the supervisor for the process lifetime.
///
/// The request queue is priority-biased: [`ServiceState::pop_next`] picks
/// the highest tier first, oldest within a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub status: ServiceStatus,
    request_queue: VecDeque<WorkRequest>,
    /// Requests with a live child, keyed by unit ID.
    pub active: BTreeMap<String, WorkRequest>,
    pub completed_units: BTreeSet<String>,
    pub failed_records: Vec<FailureRecord>,
    pub stats: Statistics,
    /// Deterministic child IDs mapped to their unit IDs. Snapshots carry
    /// only these identifiers, never live handles.
    pub spawned_children: BTreeMap<String, String>,
}

/// Serializable checkpoint snapshot of [`ServiceState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSnapshot {
    pub status: ServiceStatus,
    pub request_queue: Vec<WorkRequest>,
    pub active: BTreeMap<String, WorkRequest>,
    pub completed_units: BTreeSet<String>,
    pub failed_records: Vec<FailureRecord>,
    pub stats: Statistics,
    pub spawned_children: BTreeMap<String, String>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            status: ServiceStatus::Initializing,
            request_queue: VecDeque::new(),
            active: BTreeMap::new(),
            completed_units: BTreeSet::new(),
            failed_records: Vec::new(),
            stats: Statistics::default(),
            spawned_children: BTreeMap::new(),
        }
    }

    /// Enqueue a request. Requests are accepted even while paused; priority
    /// bias is applied at pop time so arrival order breaks ties in a tier.
    pub fn enqueue(&mut self, request: WorkRequest) {
        self.stats.total_requests += 1;
        debug!(
            unit_id = %request.unit_id,
            priority = ?request.priority,
            source = %request.source_service,
            "Request enqueued"
        );
        self.request_queue.push_back(request);
    }

    /// Pop the highest-priority request, oldest first within a tier.
    pub fn pop_next(&mut self) -> Option<WorkRequest> {
        let index = self
            .request_queue
            .iter()
            .enumerate()
            .min_by_key(|(i, r)| (r.priority, *i))
            .map(|(i, _)| i)?;
        self.request_queue.remove(index)
    }

    pub fn queue_len(&self) -> usize {
        self.request_queue.len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.request_queue.is_empty()
    }

    /// Build a checkpoint snapshot. Live handles are deliberately absent:
    /// only deterministic child identifiers cross the boundary.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            status: self.status,
            request_queue: self.request_queue.iter().cloned().collect(),
            active: self.active.clone(),
            completed_units: self.completed_units.clone(),
            failed_records: self.failed_records.clone(),
            stats: self.stats,
            spawned_children: self.spawned_children.clone(),
        }
    }

    /// Restore state from a snapshot, keeping only the children whose
    /// identifiers still resolve to a live task. The lifecycle status
    /// carries over unchanged: a paused supervisor stays paused across a
    /// checkpoint boundary.
    pub fn restore(snapshot: SupervisorSnapshot, live_child_ids: &BTreeSet<String>) -> Self {
        let mut spawned_children = BTreeMap::new();
        let mut active = snapshot.active;
        for (child_id, unit_id) in snapshot.spawned_children {
            if live_child_ids.contains(&child_id) {
                spawned_children.insert(child_id, unit_id);
            } else {
                active.remove(&unit_id);
            }
        }

        Self {
            status: snapshot.status,
            request_queue: snapshot.request_queue.into(),
            active,
            completed_units: snapshot.completed_units,
            failed_records: snapshot.failed_records,
            stats: snapshot.stats,
            spawned_children,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use forgeflow_core::request::Priority;

    fn request(unit_id: &str, priority: Priority) -> WorkRequest {
        WorkRequest::new(unit_id, "test", "because").with_priority(priority)
    }

    #[test]
    fn high_priority_jumps_the_queue() {
        let mut state = ServiceState::new();
        state.enqueue(request("a", Priority::Normal));
        state.enqueue(request("b", Priority::Normal));
        state.enqueue(request("c", Priority::High));

        let order: Vec<String> = std::iter::from_fn(|| state.pop_next())
            .map(|r| r.unit_id)
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn normal_beats_older_low() {
        let mut state = ServiceState::new();
        state.enqueue(request("low-first", Priority::Low));
        state.enqueue(request("normal-later", Priority::Normal));

        assert_eq!(state.pop_next().unwrap().unit_id, "normal-later");
        assert_eq!(state.pop_next().unwrap().unit_id, "low-first");
        assert!(state.pop_next().is_none());
    }

    #[test]
    fn fifo_within_tier() {
        let mut state = ServiceState::new();
        state.enqueue(request("n1", Priority::Normal));
        state.enqueue(request("n2", Priority::Normal));
        state.enqueue(request("h1", Priority::High));
        state.enqueue(request("h2", Priority::High));

        let order: Vec<String> = std::iter::from_fn(|| state.pop_next())
            .map(|r| r.unit_id)
            .collect();
        assert_eq!(order, vec!["h1", "h2", "n1", "n2"]);
    }

    #[test]
    fn counts_every_enqueue() {
        let mut state = ServiceState::new();
        state.enqueue(request("a", Priority::Normal));
        state.enqueue(request("b", Priority::Low));
        assert_eq!(state.stats.total_requests, 2);
        assert_eq!(state.queue_len(), 2);
    }

    #[test]
    fn snapshot_round_trip_preserves_queue_and_stats() {
        let mut state = ServiceState::new();
        state.status = ServiceStatus::Running;
        state.enqueue(request("a", Priority::Normal));
        state.enqueue(request("b", Priority::High));
        state.stats.total_completed = 4;
        state
            .spawned_children
            .insert("pipeline-x".to_string(), "x".to_string());
        state.active.insert("x".to_string(), request("x", Priority::Normal));
        state.completed_units.insert("done-unit".to_string());

        let snapshot = state.snapshot();
        let live: BTreeSet<String> = ["pipeline-x".to_string()].into();
        let restored = ServiceState::restore(snapshot, &live);

        assert_eq!(restored.status, ServiceStatus::Running);
        assert_eq!(restored.queue_len(), 2);
        assert_eq!(restored.stats, state.stats);
        assert_eq!(restored.completed_units, state.completed_units);
        assert_eq!(restored.spawned_children, state.spawned_children);
        assert!(restored.active.contains_key("x"));
    }

    #[test]
    fn restore_preserves_paused_status() {
        let mut state = ServiceState::new();
        state.status = ServiceStatus::Paused;
        state.enqueue(request("held", Priority::Normal));

        let restored = ServiceState::restore(state.snapshot(), &BTreeSet::new());
        assert_eq!(restored.status, ServiceStatus::Paused);
        assert_eq!(restored.queue_len(), 1);
    }

    #[test]
    fn restore_drops_dead_children() {
        let mut state = ServiceState::new();
        state
            .spawned_children
            .insert("pipeline-gone".to_string(), "gone".to_string());
        state
            .active
            .insert("gone".to_string(), request("gone", Priority::Normal));

        let restored = ServiceState::restore(state.snapshot(), &BTreeSet::new());
        assert!(restored.spawned_children.is_empty());
        assert!(restored.active.is_empty());
    }

    #[test]
    fn snapshot_serializes() {
        let mut state = ServiceState::new();
        state.enqueue(request("a", Priority::Normal));
        let encoded = serde_json::to_string(&state.snapshot()).unwrap();
        let decoded: SupervisorSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.request_queue.len(), 1);
    }
}
