//! Long-running service supervisor.
//!
//! A singleton loop accepting asynchronous work requests and spawning one
//! independent build pipeline per unit, without ever blocking on a child's
//! completion. Requests are deduplicated against live children, gated by
//! the evaluator, and one bad request never stalls the loop: its failure
//! is recorded and the next request proceeds.

mod children;
mod state;

pub use children::{ChildRegistry, child_id_for};
pub use state::{FailureRecord, ServiceState, ServiceStatus, Statistics, SupervisorSnapshot};

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use forgeflow_core::config::Config;
use forgeflow_core::error::Error;
use forgeflow_core::request::{PipelineOutcome, Priority, WorkRequest};

use crate::collab::Collaborators;
use crate::pipeline::BuildPipeline;

/// Signal channel depth for the supervisor singleton.
const SIGNAL_BUFFER: usize = 256;

/// Errors from the supervisor handle.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The supervisor loop has stopped and its channel is closed.
    #[error("Supervisor is no longer running")]
    Closed,
}

/// Signals accepted by the supervisor.
#[derive(Debug)]
pub enum SupervisorSignal {
    /// A unit needs (re)building.
    UnitRequested(WorkRequest),
    /// Stop dequeuing; in-flight children are unaffected.
    Pause,
    /// Resume dequeuing.
    Resume,
    /// A pipeline discovered a dependent unit; normalized to normal
    /// priority.
    DiscoveredDependent(WorkRequest),
    /// Run the staleness scan and enqueue its results.
    TriggerScan,
    /// Internal completion report from a spawned pipeline.
    ChildFinished {
        unit_id: String,
        outcome: PipelineOutcome,
    },
    /// Stop the loop; children keep running to completion on the runtime.
    Shutdown,
}

/// Cloneable handle delivering signals to the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorSignal>,
}

impl SupervisorHandle {
    pub async fn unit_requested(&self, request: WorkRequest) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::UnitRequested(request)).await
    }

    pub async fn pause_service(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::Pause).await
    }

    pub async fn resume_service(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::Resume).await
    }

    pub async fn discovered_dependent(&self, request: WorkRequest) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::DiscoveredDependent(request)).await
    }

    pub async fn trigger_scan(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::TriggerScan).await
    }

    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorSignal::Shutdown).await
    }

    async fn send(&self, signal: SupervisorSignal) -> Result<(), SupervisorError> {
        self.tx
            .send(signal)
            .await
            .map_err(|_| SupervisorError::Closed)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The supervisor singleton.
pub struct Supervisor {
    state: ServiceState,
    collab: Collaborators,
    children: Arc<ChildRegistry>,
    config: Config,
    tx: mpsc::Sender<SupervisorSignal>,
    rx: mpsc::Receiver<SupervisorSignal>,
    /// Events processed since the last checkpoint.
    events_processed: u64,
    /// Monotonic sequence used to stamp requests that arrive unstamped.
    stamp_seq: u64,
}

impl Supervisor {
    /// Create a fresh supervisor.
    pub fn new(config: Config, collab: Collaborators) -> (Self, SupervisorHandle) {
        Self::with_state(ServiceState::new(), config, collab, Arc::new(ChildRegistry::new()))
    }

    /// Restore a supervisor from a checkpoint snapshot.
    ///
    /// Child handles are re-resolved purely from their deterministic
    /// identifiers against the shared registry; identifiers that no longer
    /// resolve are dropped from active tracking.
    pub async fn from_snapshot(
        snapshot: SupervisorSnapshot,
        config: Config,
        collab: Collaborators,
        children: Arc<ChildRegistry>,
    ) -> (Self, SupervisorHandle) {
        let live = children.live_ids().await;
        let state = ServiceState::restore(snapshot, &live);
        info!(
            queued = state.queue_len(),
            live_children = live.len(),
            "Supervisor restored from snapshot"
        );
        Self::with_state(state, config, collab, children)
    }

    fn with_state(
        state: ServiceState,
        config: Config,
        collab: Collaborators,
        children: Arc<ChildRegistry>,
    ) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let handle = SupervisorHandle { tx: tx.clone() };
        (
            Self {
                state,
                collab,
                children,
                config,
                tx,
                rx,
                events_processed: 0,
                stamp_seq: 0,
            },
            handle,
        )
    }

    /// Shared child registry, for wiring a restored successor.
    pub fn child_registry(&self) -> Arc<ChildRegistry> {
        Arc::clone(&self.children)
    }

    /// Current checkpoint snapshot of service state.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.state.snapshot()
    }

    /// Run the supervisor until shutdown, returning the final state.
    pub async fn run(mut self) -> ServiceState {
        // A restored supervisor keeps its snapshot status (notably Paused).
        if self.state.status == ServiceStatus::Initializing {
            self.state.status = ServiceStatus::Running;
        }
        info!(status = ?self.state.status, "Supervisor running");

        loop {
            // Drain buffered signals first, strictly in arrival order.
            while let Ok(signal) = self.rx.try_recv() {
                if matches!(self.handle_signal(signal).await, Flow::Stop) {
                    return self.state;
                }
            }

            if self.state.status == ServiceStatus::Running && !self.state.queue_is_empty() {
                if let Some(request) = self.state.pop_next() {
                    let unit_id = request.unit_id.clone();
                    if let Err(err) = self.process_request(request).await {
                        warn!(unit_id = %unit_id, error = %err, "Request processing failed, continuing");
                        self.state.stats.total_failed += 1;
                        self.state.failed_records.push(FailureRecord {
                            unit_id,
                            error: err.to_string(),
                            retryable: err.is_retryable(),
                            attempts: 1,
                        });
                    }
                }
                self.bump_history();
            } else {
                // Idle or paused: park until the next signal.
                match self.rx.recv().await {
                    Some(signal) => {
                        if matches!(self.handle_signal(signal).await, Flow::Stop) {
                            return self.state;
                        }
                    }
                    None => {
                        warn!("All supervisor handles dropped, stopping");
                        self.state.status = ServiceStatus::Stopped;
                        return self.state;
                    }
                }
            }
        }
    }

    async fn handle_signal(&mut self, signal: SupervisorSignal) -> Flow {
        match signal {
            SupervisorSignal::UnitRequested(request) => {
                self.enqueue(request);
            }
            SupervisorSignal::DiscoveredDependent(request) => {
                // Dependents always enter at normal priority.
                let request = request.with_priority(Priority::Normal);
                self.enqueue(request);
            }
            SupervisorSignal::Pause => {
                if self.state.status == ServiceStatus::Running {
                    info!("Supervisor paused");
                    self.state.status = ServiceStatus::Paused;
                }
            }
            SupervisorSignal::Resume => {
                if self.state.status == ServiceStatus::Paused {
                    info!("Supervisor resumed");
                    self.state.status = ServiceStatus::Running;
                }
            }
            SupervisorSignal::TriggerScan => {
                self.run_scan().await;
            }
            SupervisorSignal::ChildFinished { unit_id, outcome } => {
                self.record_child_finished(unit_id, outcome).await;
            }
            SupervisorSignal::Shutdown => {
                info!(stats = ?self.state.stats, "Supervisor shutting down");
                self.state.status = ServiceStatus::Stopped;
                return Flow::Stop;
            }
        }
        self.bump_history();
        Flow::Continue
    }

    fn enqueue(&mut self, mut request: WorkRequest) {
        if request.timestamp == 0 {
            self.stamp_seq += 1;
            request.timestamp = self.stamp_seq;
        }
        self.state.enqueue(request);
    }

    /// Invoke the staleness scan and enqueue every result at low priority;
    /// units the registry marks urgent are promoted to normal.
    async fn run_scan(&mut self) {
        match self.collab.registry.scan_stale().await {
            Ok(stale) => {
                info!(count = stale.len(), "Staleness scan complete");
                for unit in stale {
                    let priority = if unit.urgent {
                        Priority::Normal
                    } else {
                        Priority::Low
                    };
                    let mut request =
                        WorkRequest::new(unit.unit_id, "staleness-scan", "stale artifact")
                            .with_priority(priority);
                    if unit.urgent {
                        request
                            .context
                            .insert("urgent".to_string(), serde_json::json!(true));
                    }
                    self.enqueue(request);
                }
            }
            Err(err) => {
                warn!(error = %err, "Staleness scan failed");
            }
        }
    }

    async fn record_child_finished(&mut self, unit_id: String, outcome: PipelineOutcome) {
        let child_id = child_id_for(&unit_id);
        self.children.remove(&child_id).await;
        self.state.active.remove(&unit_id);
        self.state.spawned_children.remove(&child_id);

        if outcome.success {
            info!(unit_id = %unit_id, "Pipeline completed");
            self.state.completed_units.insert(unit_id);
            self.state.stats.total_completed += 1;
        } else {
            let error = outcome
                .error
                .unwrap_or_else(|| "pipeline reported failure".to_string());
            warn!(unit_id = %unit_id, error = %error, "Pipeline failed");
            self.state.stats.total_failed += 1;
            self.state.failed_records.push(FailureRecord {
                unit_id,
                error,
                retryable: false,
                attempts: 1,
            });
        }
    }

    /// Process one dequeued request: dedupe, evaluate, spawn.
    async fn process_request(&mut self, request: WorkRequest) -> Result<(), Error> {
        let unit_id = request.unit_id.clone();
        if unit_id.is_empty() {
            return Err(Error::Validation("work request without a unit ID".into()));
        }

        // Idempotent dedupe: a live child for this unit absorbs the
        // request.
        let child_id = child_id_for(&unit_id);
        if self.children.is_live(&child_id).await {
            debug!(unit_id = %unit_id, "Child already in flight, skipping duplicate request");
            self.state.stats.total_skipped += 1;
            return Ok(());
        }

        let details = self.collab.registry.query_details(&unit_id).await?;
        if details.exists && !self.needs_update(&request, &details).await? {
            return Ok(());
        }

        self.spawn_pipeline(request, child_id).await;
        Ok(())
    }

    /// Evaluate an existing unit; record completed-without-spawn verdicts.
    async fn needs_update(
        &mut self,
        request: &WorkRequest,
        details: &forgeflow_core::request::UnitDetails,
    ) -> Result<bool, Error> {
        let existing = match &details.artifact_ref {
            Some(artifact_ref) => self.collab.registry.read_artifact(artifact_ref).await?,
            None => None,
        };
        let parent = match &details.parent_unit_id {
            Some(parent_id) => {
                let parent_details = self.collab.registry.query_details(parent_id).await?;
                match parent_details.artifact_ref {
                    Some(parent_ref) => self.collab.registry.read_artifact(&parent_ref).await?,
                    None => None,
                }
            }
            None => None,
        };
        let external_meta = request.context.get("external_meta");

        let evaluation = self
            .collab
            .evaluator
            .evaluate(
                &request.unit_id,
                existing.as_deref(),
                parent.as_deref(),
                external_meta,
            )
            .await?;

        if evaluation.needs_update {
            debug!(
                unit_id = %request.unit_id,
                update_kind = ?evaluation.update_kind,
                confidence = evaluation.confidence,
                reason = %evaluation.reason,
                "Evaluator requested an update"
            );
            return Ok(true);
        }

        info!(
            unit_id = %request.unit_id,
            confidence = evaluation.confidence,
            reason = %evaluation.reason,
            "Unit is current, completing without spawn"
        );
        self.state.completed_units.insert(request.unit_id.clone());
        self.state.stats.total_completed += 1;
        Ok(false)
    }

    /// Spawn an independent pipeline child keyed by its deterministic
    /// identifier. The loop never awaits the child's completion; the child
    /// reports back through a `ChildFinished` signal.
    async fn spawn_pipeline(&mut self, request: WorkRequest, child_id: String) {
        let unit_id = request.unit_id.clone();
        info!(unit_id = %unit_id, child_id = %child_id, reason = %request.reason, "Spawning build pipeline");

        let pipeline = BuildPipeline::new(
            &request,
            self.collab.clone(),
            self.config.pipeline.clone(),
            self.config.quality.clone(),
        )
        .with_supervisor(self.tx.clone());

        let report_tx = self.tx.clone();
        let report_unit = unit_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = pipeline.run().await;
            // The supervisor may be mid-checkpoint; a dropped report is
            // recovered by handle re-resolution.
            let _ = report_tx
                .send(SupervisorSignal::ChildFinished {
                    unit_id: report_unit,
                    outcome,
                })
                .await;
        });

        self.children
            .register(child_id.clone(), unit_id.clone(), handle)
            .await;
        self.state.spawned_children.insert(child_id, unit_id.clone());
        self.state.active.insert(unit_id, request);
    }

    /// Count one processed event toward the checkpoint threshold.
    fn bump_history(&mut self) {
        self.events_processed += 1;
        if self.events_processed >= self.config.supervisor.checkpoint_after_events {
            self.checkpoint_in_place();
        }
    }

    /// Restart-with-snapshot in place: serialize state, drop it, restore
    /// from the snapshot. Live handles never cross this boundary; children
    /// are re-resolved from their identifiers the next time they matter.
    /// The lifecycle status rides along in the snapshot, so a paused
    /// supervisor is still paused afterwards.
    fn checkpoint_in_place(&mut self) {
        let snapshot = self.state.snapshot();
        info!(
            events = self.events_processed,
            queued = snapshot.request_queue.len(),
            children = snapshot.spawned_children.len(),
            "Supervisor checkpoint: restarting with snapshot"
        );
        // Restore keeps every recorded child identifier; dead ones are
        // pruned lazily when dedupe or completion next consults the
        // registry.
        let live: std::collections::BTreeSet<String> =
            snapshot.spawned_children.keys().cloned().collect();
        self.state = ServiceState::restore(snapshot, &live);
        self.events_processed = 0;
    }
}
