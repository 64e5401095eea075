//! In-memory collaborators for tests and development mode.
//!
//! These keep the full collaborator contract honest (lineage, artifacts,
//! stale scans, failure injection) without any external service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use forgeflow_core::contracts::{
    CommitReceipt, Evaluator, Generator, GenerationOutput, QualityRunner, Registry, VersionControl,
};
use forgeflow_core::error::{Error, Result};
use forgeflow_core::quality::{CheckKind, CheckReport, RemediationTask};
use forgeflow_core::request::{
    EvaluationOutcome, LineageInfo, StaleUnit, StatusUpdate, UnitDetails, UpdateKind,
};

use crate::collab::Collaborators;

/// One unit known to the in-memory registry.
#[derive(Debug, Clone, Default)]
pub struct UnitRecord {
    pub status: Option<String>,
    pub artifact_ref: Option<String>,
    pub branch_ref: Option<String>,
    pub parent_unit_id: Option<String>,
    pub dependents: Vec<String>,
    pub stale: bool,
    /// Stale-scan urgency marker.
    pub urgent: bool,
}

/// In-memory unit registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    units: RwLock<BTreeMap<String, UnitRecord>>,
    artifacts: RwLock<HashMap<String, String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a unit record.
    pub async fn put_unit(&self, unit_id: &str, record: UnitRecord) {
        self.units.write().await.insert(unit_id.to_string(), record);
    }

    /// Store artifact content under a reference.
    pub async fn put_artifact(&self, artifact_ref: &str, content: &str) {
        self.artifacts
            .write()
            .await
            .insert(artifact_ref.to_string(), content.to_string());
    }

    pub async fn unit(&self, unit_id: &str) -> Option<UnitRecord> {
        self.units.read().await.get(unit_id).cloned()
    }

    fn lineage_of(units: &BTreeMap<String, UnitRecord>, unit_id: &str) -> Vec<String> {
        let mut parents = Vec::new();
        let mut cursor = units.get(unit_id).and_then(|u| u.parent_unit_id.clone());
        while let Some(parent) = cursor {
            if parents.contains(&parent) {
                break; // cycle guard
            }
            cursor = units.get(&parent).and_then(|u| u.parent_unit_id.clone());
            parents.push(parent);
        }
        parents
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn query_details(&self, unit_id: &str) -> Result<UnitDetails> {
        let units = self.units.read().await;
        Ok(units.get(unit_id).map_or_else(UnitDetails::default, |u| {
            UnitDetails {
                exists: true,
                status: u.status.clone(),
                artifact_ref: u.artifact_ref.clone(),
                parent_unit_id: u.parent_unit_id.clone(),
                dependents: u.dependents.clone(),
            }
        }))
    }

    async fn query_lineage(&self, unit_id: &str) -> Result<LineageInfo> {
        let units = self.units.read().await;
        let parents = Self::lineage_of(&units, unit_id);
        Ok(LineageInfo {
            unit_id: unit_id.to_string(),
            depth: u32::try_from(parents.len()).unwrap_or(u32::MAX),
            parents,
        })
    }

    async fn read_artifact(&self, artifact_ref: &str) -> Result<Option<String>> {
        Ok(self.artifacts.read().await.get(artifact_ref).cloned())
    }

    async fn update_status(&self, unit_id: &str, update: StatusUpdate) -> Result<()> {
        let mut units = self.units.write().await;
        let record = units.entry(unit_id.to_string()).or_default();
        record.status = Some(update.status);
        if update.artifact_ref.is_some() {
            record.artifact_ref = update.artifact_ref;
        }
        if update.branch_ref.is_some() {
            record.branch_ref = update.branch_ref;
        }
        record.stale = false;
        Ok(())
    }

    async fn scan_stale(&self) -> Result<Vec<StaleUnit>> {
        Ok(self
            .units
            .read()
            .await
            .iter()
            .filter(|(_, u)| u.stale)
            .map(|(id, u)| StaleUnit {
                unit_id: id.clone(),
                urgent: u.urgent,
            })
            .collect())
    }
}

/// Generator producing deterministic placeholder content, with optional
/// transient-failure injection for retry tests.
#[derive(Default)]
pub struct StaticGenerator {
    fail_first: AtomicU32,
}

impl StaticGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` calls with a transient error.
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn generate(
        &self,
        unit_id: &str,
        reason: &str,
        context: Option<&str>,
        parent_artifact: Option<&str>,
    ) -> Result<GenerationOutput> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::TransientProvider("generator warming up".into()));
        }
        let mut content = format!("# {unit_id}\nreason: {reason}\n");
        if let Some(ctx) = context {
            content.push_str(&format!("context: {ctx}\n"));
        }
        if let Some(parent) = parent_artifact {
            content.push_str(&format!("parent-bytes: {}\n", parent.len()));
        }
        Ok(GenerationOutput {
            content,
            artifact_ref: format!("artifact://{unit_id}"),
        })
    }
}

/// Version control stub recording commits, with optional failure mode.
#[derive(Default)]
pub struct RecordingVersionControl {
    pub commits: RwLock<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingVersionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A version control collaborator whose commits always fail.
    pub fn failing() -> Self {
        Self {
            commits: RwLock::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl VersionControl for RecordingVersionControl {
    async fn commit(
        &self,
        unit_id: &str,
        _artifact_ref: &str,
        branch: &str,
        _message: &str,
    ) -> Result<CommitReceipt> {
        if self.fail {
            return Err(Error::PermanentProvider("remote rejected push".into()));
        }
        let mut commits = self.commits.write().await;
        commits.push((unit_id.to_string(), branch.to_string()));
        Ok(CommitReceipt {
            revision_id: format!("rev-{}", commits.len()),
        })
    }
}

/// Evaluator that requests an update only when the unit has no artifact,
/// mirroring the common "first build" path.
#[derive(Default)]
pub struct FreshnessEvaluator;

#[async_trait]
impl Evaluator for FreshnessEvaluator {
    async fn evaluate(
        &self,
        _unit_id: &str,
        existing_artifact: Option<&str>,
        _parent_artifact: Option<&str>,
        _external_meta: Option<&Value>,
    ) -> Result<EvaluationOutcome> {
        Ok(existing_artifact.map_or_else(
            || EvaluationOutcome {
                needs_update: true,
                update_kind: Some(UpdateKind::Create),
                confidence: 100,
                reason: "no artifact recorded".to_string(),
            },
            |_| EvaluationOutcome {
                needs_update: false,
                update_kind: None,
                confidence: 90,
                reason: "artifact already present".to_string(),
            },
        ))
    }
}

/// Quality runner scripted per check kind, optionally improving after
/// fixes are applied.
pub struct ScriptedQuality {
    /// Checks that fail until a fix for them is applied.
    failing: RwLock<BTreeMap<CheckKind, String>>,
    /// Coverage reported by the test check.
    coverage: f64,
    /// Whether `apply_fix` actually repairs the targeted check.
    fixes_work: bool,
    pub fixes_applied: AtomicU32,
}

impl ScriptedQuality {
    /// All checks green at the given coverage.
    pub fn passing(coverage: f64) -> Self {
        Self {
            failing: RwLock::new(BTreeMap::new()),
            coverage,
            fixes_work: true,
            fixes_applied: AtomicU32::new(0),
        }
    }

    /// The given checks fail; fixes repair them when `fixes_work`.
    pub fn with_failures(failures: &[(CheckKind, &str)], coverage: f64, fixes_work: bool) -> Self {
        Self {
            failing: RwLock::new(
                failures
                    .iter()
                    .map(|(k, d)| (*k, (*d).to_string()))
                    .collect(),
            ),
            coverage,
            fixes_work,
            fixes_applied: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl QualityRunner for ScriptedQuality {
    async fn run_check(&self, kind: CheckKind, _unit_path: &str) -> Result<CheckReport> {
        let failing = self.failing.read().await;
        let detail = failing.get(&kind).cloned();
        Ok(CheckReport {
            kind,
            passed: detail.is_none(),
            detail: detail.unwrap_or_default(),
            coverage: (kind == CheckKind::Tests).then_some(self.coverage),
        })
    }

    async fn apply_fix(&self, _unit_path: &str, task: &RemediationTask) -> Result<()> {
        self.fixes_applied.fetch_add(1, Ordering::SeqCst);
        if self.fixes_work {
            self.failing.write().await.remove(&task.category);
        }
        Ok(())
    }
}

/// Default in-memory collaborator set for development mode and tests.
pub fn collaborators() -> (Arc<InMemoryRegistry>, Collaborators) {
    let registry = Arc::new(InMemoryRegistry::new());
    let collab = Collaborators {
        registry: registry.clone(),
        generator: Arc::new(StaticGenerator::new()),
        version_control: Arc::new(RecordingVersionControl::new()),
        evaluator: Arc::new(FreshnessEvaluator),
        quality: Arc::new(ScriptedQuality::passing(100.0)),
    };
    (registry, collab)
}
