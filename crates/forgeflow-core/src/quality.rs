//! Compliance scoring and remediation task model.
//!
//! Eight independent checks feed a weighted score out of 100. Every check
//! contributes its full weight on pass except the test check, which scales
//! its weight by measured coverage.

use serde::{Deserialize, Serialize};

/// Minimum score at which a unit is accepted without remediation.
pub const ACCEPT_THRESHOLD: f64 = 85.0;

/// The eight independent quality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Structure,
    Typecheck,
    Lint,
    Tests,
    Security,
    Docs,
    License,
    Integration,
}

impl CheckKind {
    /// All checks in canonical execution order.
    pub const ALL: [Self; 8] = [
        Self::Structure,
        Self::Typecheck,
        Self::Lint,
        Self::Tests,
        Self::Security,
        Self::Docs,
        Self::License,
        Self::Integration,
    ];

    /// Fixed weight; all weights sum to 100.
    pub const fn weight(self) -> f64 {
        match self {
            Self::Structure => 10.0,
            Self::Typecheck => 20.0,
            Self::Lint => 15.0,
            Self::Tests => 25.0,
            Self::Security => 15.0,
            Self::Docs | Self::License | Self::Integration => 5.0,
        }
    }

    /// Fix priority assigned to a failure of this check.
    pub const fn fix_priority(self) -> FixPriority {
        match self {
            Self::Typecheck | Self::Security => FixPriority::Critical,
            Self::Structure | Self::Tests | Self::Integration => FixPriority::High,
            Self::Lint | Self::License => FixPriority::Medium,
            Self::Docs => FixPriority::Low,
        }
    }
}

/// Priority of a remediation fix; `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// Outcome of one quality check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub kind: CheckKind,
    pub passed: bool,
    pub detail: String,
    /// Test coverage in percent; only meaningful for [`CheckKind::Tests`].
    pub coverage: Option<f64>,
}

impl CheckReport {
    /// Points this report contributes to the weighted score.
    pub fn points(&self) -> f64 {
        if self.kind == CheckKind::Tests {
            // Tests contribute weight scaled by coverage, pass or fail.
            let coverage = self.coverage.unwrap_or(0.0).clamp(0.0, 100.0);
            return self.kind.weight() * coverage / 100.0;
        }
        if self.passed { self.kind.weight() } else { 0.0 }
    }
}

/// Acceptance band of a compliance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    Excellent,
    Good,
    Acceptable,
    Blocked,
}

/// Weighted aggregate score gating acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScore {
    /// Score out of 100.
    pub score: f64,
    pub level: ComplianceLevel,
}

impl ComplianceScore {
    /// Aggregate check reports into a weighted score.
    pub fn from_reports(reports: &[CheckReport]) -> Self {
        let score: f64 = reports.iter().map(CheckReport::points).sum();
        Self::from_score(score)
    }

    /// Classify a raw score into its acceptance band.
    pub fn from_score(score: f64) -> Self {
        let level = if score >= 95.0 {
            ComplianceLevel::Excellent
        } else if score >= 90.0 {
            ComplianceLevel::Good
        } else if score >= ACCEPT_THRESHOLD {
            ComplianceLevel::Acceptable
        } else {
            ComplianceLevel::Blocked
        };
        Self { score, level }
    }

    /// Whether the score clears the acceptance threshold.
    pub fn is_acceptable(&self) -> bool {
        self.score >= ACCEPT_THRESHOLD
    }
}

/// One actionable remediation item derived from a failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationTask {
    pub category: CheckKind,
    pub priority: FixPriority,
    pub description: String,
    pub suggested_fix: Option<String>,
}

impl RemediationTask {
    /// Derive a task from a failing check report.
    pub fn from_report(report: &CheckReport) -> Self {
        Self {
            category: report.kind,
            priority: report.kind.fix_priority(),
            description: report.detail.clone(),
            suggested_fix: None,
        }
    }
}

/// Remediation tasks for every failing report, ordered critical to low.
pub fn tasks_from_reports(reports: &[CheckReport]) -> Vec<RemediationTask> {
    let mut tasks: Vec<RemediationTask> = reports
        .iter()
        .filter(|r| !r.passed)
        .map(RemediationTask::from_report)
        .collect();
    tasks.sort_by_key(|t| t.priority);
    tasks
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn passing(kind: CheckKind) -> CheckReport {
        CheckReport {
            kind,
            passed: true,
            detail: String::new(),
            coverage: None,
        }
    }

    fn failing(kind: CheckKind) -> CheckReport {
        CheckReport {
            kind,
            passed: false,
            detail: format!("{kind:?} failed"),
            coverage: None,
        }
    }

    #[test]
    fn weights_sum_to_one_hundred() {
        let total: f64 = CheckKind::ALL.iter().map(|k| k.weight()).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn all_binary_pass_with_eighty_percent_coverage_is_excellent() {
        let mut reports: Vec<CheckReport> = CheckKind::ALL
            .iter()
            .filter(|k| **k != CheckKind::Tests)
            .map(|k| passing(*k))
            .collect();
        reports.push(CheckReport {
            kind: CheckKind::Tests,
            passed: true,
            detail: String::new(),
            coverage: Some(80.0),
        });

        let score = ComplianceScore::from_reports(&reports);
        assert_eq!(score.score, 95.0);
        assert_eq!(score.level, ComplianceLevel::Excellent);
    }

    #[test]
    fn tests_scale_by_coverage_even_on_fail() {
        let report = CheckReport {
            kind: CheckKind::Tests,
            passed: false,
            detail: String::new(),
            coverage: Some(40.0),
        };
        assert_eq!(report.points(), 10.0);
    }

    #[test]
    fn missing_coverage_counts_as_zero() {
        let report = CheckReport {
            kind: CheckKind::Tests,
            passed: true,
            detail: String::new(),
            coverage: None,
        };
        assert_eq!(report.points(), 0.0);
    }

    #[test]
    fn level_bands() {
        assert_eq!(ComplianceScore::from_score(95.0).level, ComplianceLevel::Excellent);
        assert_eq!(ComplianceScore::from_score(90.0).level, ComplianceLevel::Good);
        assert_eq!(ComplianceScore::from_score(85.0).level, ComplianceLevel::Acceptable);
        assert_eq!(ComplianceScore::from_score(84.9).level, ComplianceLevel::Blocked);
        assert!(!ComplianceScore::from_score(84.9).is_acceptable());
    }

    #[test]
    fn tasks_order_critical_first() {
        let reports = vec![
            failing(CheckKind::Docs),
            failing(CheckKind::Security),
            failing(CheckKind::Lint),
            failing(CheckKind::Structure),
        ];
        let tasks = tasks_from_reports(&reports);
        let priorities: Vec<FixPriority> = tasks.iter().map(|t| t.priority).collect();
        assert_eq!(
            priorities,
            vec![
                FixPriority::Critical,
                FixPriority::High,
                FixPriority::Medium,
                FixPriority::Low
            ]
        );
    }

    #[test]
    fn passing_reports_yield_no_tasks() {
        let reports: Vec<CheckReport> = CheckKind::ALL.iter().map(|k| passing(*k)).collect();
        assert!(tasks_from_reports(&reports).is_empty());
    }
}
