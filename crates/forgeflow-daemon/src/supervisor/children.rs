//! Registry of spawned pipeline children keyed by deterministic IDs.
//!
//! Live [`JoinHandle`]s never appear in supervisor state or snapshots;
//! after a checkpoint the supervisor re-resolves children here purely by
//! their string identifiers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// Deterministic child identifier for a unit's pipeline.
///
/// Stable across restarts and redeliveries, which is what makes duplicate
/// `unit_requested` signals naturally idempotent.
pub fn child_id_for(unit_id: &str) -> String {
    format!("pipeline-{unit_id}")
}

struct ChildEntry {
    unit_id: String,
    handle: JoinHandle<()>,
}

/// Handle registry shared between the supervisor and its checkpointed
/// successors.
#[derive(Default)]
pub struct ChildRegistry {
    entries: Arc<RwLock<HashMap<String, ChildEntry>>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned child under its deterministic identifier.
    pub async fn register(&self, child_id: String, unit_id: String, handle: JoinHandle<()>) {
        debug!(child_id = %child_id, unit_id = %unit_id, "Registering child");
        self.entries
            .write()
            .await
            .insert(child_id, ChildEntry { unit_id, handle });
    }

    /// Whether the identifier resolves to a still-running child.
    pub async fn is_live(&self, child_id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(child_id)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Resolve an identifier to its unit ID, live children only.
    pub async fn resolve(&self, child_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(child_id)?;
        if entry.handle.is_finished() {
            return None;
        }
        Some(entry.unit_id.clone())
    }

    /// Drop a child entry (after its completion report).
    pub async fn remove(&self, child_id: &str) -> bool {
        self.entries.write().await.remove(child_id).is_some()
    }

    /// Identifiers of all live children, used to rebuild state after a
    /// checkpoint.
    pub async fn live_ids(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn child_ids_are_deterministic() {
        assert_eq!(child_id_for("pkg-a"), "pipeline-pkg-a");
        assert_eq!(child_id_for("pkg-a"), child_id_for("pkg-a"));
    }

    #[tokio::test]
    async fn live_child_resolves_by_id() {
        let registry = ChildRegistry::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry
            .register(child_id_for("u1"), "u1".to_string(), handle)
            .await;

        assert!(registry.is_live("pipeline-u1").await);
        assert_eq!(registry.resolve("pipeline-u1").await.as_deref(), Some("u1"));
        assert_eq!(registry.live_ids().await.len(), 1);

        // Clean up the parked task.
        assert!(registry.remove("pipeline-u1").await);
    }

    #[tokio::test]
    async fn finished_child_no_longer_resolves() {
        let registry = ChildRegistry::new();
        let handle = tokio::spawn(async {});
        handle.abort();
        // Wait for the runtime to retire the task.
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry
            .register(child_id_for("u2"), "u2".to_string(), handle)
            .await;

        assert!(!registry.is_live("pipeline-u2").await);
        assert!(registry.resolve("pipeline-u2").await.is_none());
        assert!(registry.live_ids().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_live() {
        let registry = ChildRegistry::new();
        assert!(!registry.is_live("pipeline-ghost").await);
        assert!(!registry.remove("pipeline-ghost").await);
        assert!(registry.is_empty().await);
    }
}
