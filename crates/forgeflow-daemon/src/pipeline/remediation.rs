//! Bounded quality-remediation loop.
//!
//! Runs the eight independent checks, scores them, and when the score is
//! below the acceptance threshold applies fixes (critical first) and
//! re-checks, up to a bounded number of attempts. Exhausting the budget
//! below threshold is reported, never silently accepted.

use tracing::{info, warn};

use forgeflow_core::contracts::QualityRunner;
use forgeflow_core::error::Result;
use forgeflow_core::quality::{
    CheckKind, CheckReport, ComplianceScore, RemediationTask, tasks_from_reports,
};

/// Terminal result of one quality gate run.
#[derive(Debug, Clone)]
pub struct RemediationOutcome {
    pub success: bool,
    pub score: ComplianceScore,
    /// Fix-and-recheck rounds performed (0 when the first pass was clean).
    pub attempts: u32,
    /// Unresolved issues when the budget ran out, ordered critical first.
    pub remaining_issues: Vec<RemediationTask>,
}

/// Run the quality gate for one unit.
///
/// `max_attempts` bounds the fix-and-recheck rounds after the initial
/// check pass; the loop exits early as soon as the score clears the
/// threshold.
pub async fn run_quality_gate(
    runner: &dyn QualityRunner,
    unit_path: &str,
    max_attempts: u32,
) -> Result<RemediationOutcome> {
    let mut reports = run_all_checks(runner, unit_path).await?;
    let mut score = ComplianceScore::from_reports(&reports);
    let mut attempts = 0u32;

    while !score.is_acceptable() && attempts < max_attempts {
        attempts += 1;
        let tasks = tasks_from_reports(&reports);
        info!(
            unit_path,
            attempt = attempts,
            score = score.score,
            open_issues = tasks.len(),
            "Quality below threshold, applying fixes"
        );
        for task in &tasks {
            if let Err(err) = runner.apply_fix(unit_path, task).await {
                warn!(
                    unit_path,
                    category = ?task.category,
                    error = %err,
                    "Fix application failed, continuing with remaining fixes"
                );
            }
        }
        reports = run_all_checks(runner, unit_path).await?;
        score = ComplianceScore::from_reports(&reports);
    }

    if score.is_acceptable() {
        info!(unit_path, score = score.score, attempts, "Quality gate passed");
        Ok(RemediationOutcome {
            success: true,
            score,
            attempts,
            remaining_issues: Vec::new(),
        })
    } else {
        let remaining_issues = tasks_from_reports(&reports);
        warn!(
            unit_path,
            score = score.score,
            attempts,
            remaining = remaining_issues.len(),
            "Remediation budget exhausted below threshold"
        );
        Ok(RemediationOutcome {
            success: false,
            score,
            attempts,
            remaining_issues,
        })
    }
}

async fn run_all_checks(runner: &dyn QualityRunner, unit_path: &str) -> Result<Vec<CheckReport>> {
    let mut reports = Vec::with_capacity(CheckKind::ALL.len());
    for kind in CheckKind::ALL {
        reports.push(runner.run_check(kind, unit_path).await?);
    }
    Ok(reports)
}
