//! Dependency-ordered build pipeline.
//!
//! One pipeline instance runs once per unit as an explicit state machine:
//! lineage discovery, parent wait, context assembly, generation, optional
//! quality gate, persistence, dependent discovery, notification. No phase
//! starts before its predecessor's output is available; dependency
//! ordering between units is enforced only by the parent-wait poll, never
//! by task scheduling.

pub mod remediation;

pub use remediation::{RemediationOutcome, run_quality_gate};

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use forgeflow_core::config::{PipelineConfig, QualityConfig};
use forgeflow_core::contracts::GenerationOutput;
use forgeflow_core::error::{Error, Result};
use forgeflow_core::request::{LineageInfo, PipelineOutcome, StatusUpdate, WorkRequest};

use crate::collab::Collaborators;
use crate::substrate::{RetryPolicy, run_activity};
use crate::supervisor::SupervisorSignal;

/// Phases of the build pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Lineage,
    AwaitParents,
    AssembleContext,
    Generate,
    QualityGate,
    Persist,
    DiscoverDependents,
    Notify,
    Done,
}

/// Data accumulated as the pipeline advances through its phases.
#[derive(Default)]
struct PhaseData {
    lineage: Option<LineageInfo>,
    parent_artifact: Option<String>,
    generation: Option<GenerationOutput>,
    branch_ref: Option<String>,
    dependents: Vec<String>,
}

/// One per-unit build pipeline run.
pub struct BuildPipeline {
    unit_id: String,
    reason: String,
    context: BTreeMap<String, Value>,
    collab: Collaborators,
    config: PipelineConfig,
    quality: QualityConfig,
    /// Channel back to the supervisor for dependent notification; absent
    /// in standalone runs.
    supervisor: Option<mpsc::Sender<SupervisorSignal>>,
}

impl BuildPipeline {
    pub fn new(request: &WorkRequest, collab: Collaborators, config: PipelineConfig, quality: QualityConfig) -> Self {
        Self {
            unit_id: request.unit_id.clone(),
            reason: request.reason.clone(),
            context: request.context.clone(),
            collab,
            config,
            quality,
            supervisor: None,
        }
    }

    /// Wire the supervisor channel used by the notify phase.
    #[must_use]
    pub fn with_supervisor(mut self, tx: mpsc::Sender<SupervisorSignal>) -> Self {
        self.supervisor = Some(tx);
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.activity_max_attempts,
            timeout: self.config.activity_timeout(),
            backoff_base: Duration::from_secs(60).min(self.config.activity_backoff_cap()),
            backoff_cap: self.config.activity_backoff_cap(),
        }
    }

    /// Drive the pipeline to completion, returning a terminal, inspectable
    /// outcome. Errors in any phase fold into `{success: false}`; they
    /// never escape as panics or stall the supervisor.
    pub async fn run(self) -> PipelineOutcome {
        info!(unit_id = %self.unit_id, reason = %self.reason, "Build pipeline starting");
        let mut data = PhaseData::default();
        let mut phase = Phase::Lineage;

        while phase != Phase::Done {
            phase = match self.step(phase, &mut data).await {
                Ok(next) => next,
                Err(err) => {
                    warn!(unit_id = %self.unit_id, phase = ?phase, error = %err, "Pipeline failed");
                    return PipelineOutcome {
                        success: false,
                        artifact_ref: data.generation.as_ref().map(|g| g.artifact_ref.clone()),
                        branch_ref: data.branch_ref.clone(),
                        error: Some(err.to_string()),
                        dependents_discovered: data.dependents.clone(),
                    };
                }
            };
        }

        info!(unit_id = %self.unit_id, dependents = data.dependents.len(), "Build pipeline finished");
        PipelineOutcome {
            success: true,
            artifact_ref: data.generation.as_ref().map(|g| g.artifact_ref.clone()),
            branch_ref: data.branch_ref,
            error: None,
            dependents_discovered: data.dependents,
        }
    }

    async fn step(&self, phase: Phase, data: &mut PhaseData) -> Result<Phase> {
        match phase {
            Phase::Lineage => {
                let registry = &self.collab.registry;
                let lineage = run_activity("query_lineage", &self.retry_policy(), || {
                    registry.query_lineage(&self.unit_id)
                })
                .await?;
                debug!(unit_id = %self.unit_id, depth = lineage.depth, "Lineage discovered");
                data.lineage = Some(lineage);
                Ok(Phase::AwaitParents)
            }
            Phase::AwaitParents => {
                if let Some(lineage) = &data.lineage {
                    for parent in &lineage.parents {
                        self.await_parent(parent).await;
                    }
                }
                Ok(Phase::AssembleContext)
            }
            Phase::AssembleContext => {
                data.parent_artifact = self.nearest_parent_artifact(data).await;
                Ok(Phase::Generate)
            }
            Phase::Generate => {
                let generator = &self.collab.generator;
                let context = self.context.get("context").and_then(Value::as_str);
                let parent = data.parent_artifact.as_deref();
                let output = run_activity("generate", &self.retry_policy(), || {
                    generator.generate(&self.unit_id, &self.reason, context, parent)
                })
                .await?;
                data.generation = Some(output);
                Ok(Phase::QualityGate)
            }
            Phase::QualityGate => {
                if !self.wants_quality_gate() {
                    return Ok(Phase::Persist);
                }
                let unit_path = self
                    .context
                    .get("unit_path")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.unit_id)
                    .to_string();
                let outcome = run_quality_gate(
                    self.collab.quality.as_ref(),
                    &unit_path,
                    self.quality.max_attempts,
                )
                .await?;
                if !outcome.success {
                    return Err(Error::QualityThreshold {
                        score: outcome.score.score,
                        attempts: outcome.attempts,
                    });
                }
                Ok(Phase::Persist)
            }
            Phase::Persist => {
                self.persist(data).await;
                Ok(Phase::DiscoverDependents)
            }
            Phase::DiscoverDependents => {
                let details = self.collab.registry.query_details(&self.unit_id).await?;
                data.dependents = details.dependents;
                Ok(Phase::Notify)
            }
            Phase::Notify => {
                self.notify_dependents(data).await;
                Ok(Phase::Done)
            }
            Phase::Done => Ok(Phase::Done),
        }
    }

    /// Poll the registry until the parent has an artifact, up to the hard
    /// ceiling. Reaching the ceiling is a documented graceful degradation:
    /// the pipeline proceeds without that parent's context.
    async fn await_parent(&self, parent: &str) {
        // A zero interval would poll forever without advancing the wait
        // clock toward the ceiling.
        let interval = self
            .config
            .parent_poll_interval()
            .max(Duration::from_millis(10));
        let ceiling = self.config.parent_wait_ceiling();
        let mut waited = Duration::ZERO;

        loop {
            match self.collab.registry.query_details(parent).await {
                Ok(details) if details.artifact_ref.is_some() => {
                    debug!(unit_id = %self.unit_id, parent, "Parent artifact available");
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(unit_id = %self.unit_id, parent, error = %err, "Parent poll failed");
                }
            }
            if waited >= ceiling {
                warn!(
                    unit_id = %self.unit_id,
                    parent,
                    waited_secs = waited.as_secs(),
                    "Parent wait ceiling reached, proceeding without parent context"
                );
                return;
            }
            tokio::time::sleep(interval).await;
            waited += interval;
        }
    }

    /// Read the closest parent's artifact as generation context, if any.
    async fn nearest_parent_artifact(&self, data: &PhaseData) -> Option<String> {
        let nearest = data.lineage.as_ref()?.parents.first()?;
        let details = self.collab.registry.query_details(nearest).await.ok()?;
        let artifact_ref = details.artifact_ref?;
        match self.collab.registry.read_artifact(&artifact_ref).await {
            Ok(content) => content,
            Err(err) => {
                warn!(unit_id = %self.unit_id, parent = %nearest, error = %err, "Parent artifact unreadable");
                None
            }
        }
    }

    /// Commit the artifact, then update the registry regardless of commit
    /// success. A generated artifact is never lost to a commit failure.
    async fn persist(&self, data: &mut PhaseData) {
        let Some(artifact_ref) = data.generation.as_ref().map(|g| g.artifact_ref.clone()) else {
            return;
        };
        let branch = format!("forgeflow/{}", self.unit_id);
        let message = format!("Regenerate {}: {}", self.unit_id, self.reason);

        let vcs = &self.collab.version_control;
        let commit = run_activity("commit", &self.retry_policy(), || {
            vcs.commit(&self.unit_id, &artifact_ref, &branch, &message)
        })
        .await;

        let status = match commit {
            Ok(receipt) => {
                debug!(unit_id = %self.unit_id, revision = %receipt.revision_id, "Artifact committed");
                data.branch_ref = Some(branch.clone());
                "committed"
            }
            Err(err) => {
                warn!(unit_id = %self.unit_id, error = %err, "Commit failed, keeping generated artifact");
                "generated"
            }
        };

        let update = StatusUpdate {
            artifact_ref: Some(artifact_ref),
            branch_ref: data.branch_ref.clone(),
            status: status.to_string(),
        };
        if let Err(err) = self.collab.registry.update_status(&self.unit_id, update).await {
            warn!(unit_id = %self.unit_id, error = %err, "Registry status update failed");
        }
    }

    /// Signal the supervisor about every discovered dependent.
    async fn notify_dependents(&self, data: &PhaseData) {
        let Some(tx) = &self.supervisor else {
            return;
        };
        for dependent in &data.dependents {
            let request = WorkRequest::new(
                dependent.clone(),
                "build-pipeline",
                format!("dependency {} updated", self.unit_id),
            );
            if tx
                .send(SupervisorSignal::DiscoveredDependent(request))
                .await
                .is_err()
            {
                warn!(unit_id = %self.unit_id, dependent = %dependent, "Supervisor gone, dropping dependent notification");
            }
        }
    }

    fn wants_quality_gate(&self) -> bool {
        self.context
            .get("quality_gate")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
