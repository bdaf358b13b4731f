use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{FeedbackError, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Journey and report ids become path components, so they are restricted
/// to a filesystem-safe alphabet.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(FeedbackError::Validation(format!(
            "{} must be 1-128 characters of [A-Za-z0-9_-], got {:?}",
            kind, value
        )))
    }
}

pub fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(FeedbackError::Validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

pub fn validate_step_number(step_number: i64) -> Result<u32> {
    if step_number <= 0 {
        return Err(FeedbackError::Validation(format!(
            "step_number must be a positive integer, got {}",
            step_number
        )));
    }
    u32::try_from(step_number).map_err(|_| {
        FeedbackError::Validation(format!("step_number {} is out of range", step_number))
    })
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    FixSuggestions,
    UxReview,
    RegressionAnalysis,
    ErrorAnalysis,
    PerformanceReport,
    ApiIssues,
}

/// Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Actioned,
}

// ============================================================================
// Run key
// ============================================================================

/// Composite identity of a run: start time plus journey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub started_at: DateTime<Utc>,
    pub journey_id: String,
}

impl RunKey {
    pub fn new(started_at: DateTime<Utc>, journey_id: &str) -> Result<Self> {
        validate_identifier("journey_id", journey_id)?;
        Ok(Self {
            // run_id only carries milliseconds
            started_at: started_at.trunc_subsecs(3),
            journey_id: journey_id.to_string(),
        })
    }

    /// Sortable directory name: `<YYYYMMDDTHHMMSSmmmZ>_<journey_id>`.
    pub fn run_id(&self) -> String {
        format!(
            "{}_{}",
            self.started_at.format(RUN_TIMESTAMP_FORMAT),
            self.journey_id
        )
    }

    pub fn parse(run_id: &str) -> Result<Self> {
        let invalid = || FeedbackError::Validation(format!("malformed run_id {:?}", run_id));
        let (ts, journey_id) = run_id.split_once('_').ok_or_else(invalid)?;
        let naive = NaiveDateTime::parse_from_str(ts, RUN_TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        validate_identifier("journey_id", journey_id).map_err(|_| invalid())?;
        Ok(Self {
            started_at: naive.and_utc(),
            journey_id: journey_id.to_string(),
        })
    }
}

// ============================================================================
// Steps
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFailure {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// A step as persisted in `step-NNNN.json`. Acknowledgment state lives here
/// so the failure index can always be rebuilt from run directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: u32,
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub network_failures: Vec<NetworkFailure>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub screenshot: Option<AttachmentMeta>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_taken: Option<String>,
}

impl StepRecord {
    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Fail
    }

    pub fn is_open_failure(&self) -> bool {
        self.is_failure() && !self.acknowledged
    }
}

/// Wire shape of a step submitted by the test agent.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSubmission {
    pub journey_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    pub step_number: i64,
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub network_failures: Vec<NetworkFailure>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Inline PNG, hex encoded. Large screenshots should use the upload route.
    #[serde(default)]
    pub screenshot_hex: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
    pub total: usize,
}

impl StepCounts {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a StepRecord>) -> Self {
        let mut counts = StepCounts::default();
        for step in steps {
            counts.add(step.status);
        }
        counts
    }

    pub fn add(&mut self, status: StepStatus) {
        match status {
            StepStatus::Pass => self.pass += 1,
            StepStatus::Fail => self.fail += 1,
            StepStatus::Skip => self.skip += 1,
        }
        self.total += 1;
    }
}

// ============================================================================
// Runs
// ============================================================================

/// `run.json`: the run's own metadata, rewritten on every step write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub journey_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: RunStatus,
    pub counts: StepCounts,
    /// Bumped by every write into the run. Index files record the revision
    /// they were derived from, so a reader can tell when one is behind.
    #[serde(default)]
    pub revision: u64,
}

impl RunMeta {
    /// Re-derive the rollup against `now`; a run closes by going idle.
    pub fn refresh_status(&mut self, now: DateTime<Utc>, idle: Duration) {
        self.status = derive_run_status(&self.counts, self.last_activity_at, now, idle);
    }
}

pub fn derive_run_status(
    counts: &StepCounts,
    last_activity_at: DateTime<Utc>,
    now: DateTime<Utc>,
    idle: Duration,
) -> RunStatus {
    if counts.fail > 0 {
        RunStatus::Failed
    } else if now - last_activity_at > idle {
        RunStatus::Passed
    } else {
        RunStatus::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub meta: RunMeta,
    pub steps: Vec<StepRecord>,
    pub reports: Vec<ReportRecord>,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report_id: String,
    pub run_id: String,
    pub journey_id: String,
    pub report_type: ReportType,
    pub title: String,
    pub markdown_content: String,
    #[serde(default)]
    pub related_steps: Vec<u32>,
    pub priority: Priority,
    #[serde(default)]
    pub affected_files: Vec<String>,
    pub status: ReportStatus,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(default)]
    pub actioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReportRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ReportStatus::Pending
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSubmission {
    pub journey_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub report_id: Option<String>,
    pub report_type: ReportType,
    pub title: String,
    pub markdown_content: String,
    #[serde(default)]
    pub related_steps: Vec<i64>,
    pub priority: Priority,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Index entries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub run_id: String,
    pub journey_id: String,
    pub step_number: u32,
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub console_errors: Vec<String>,
    pub network_failures: Vec<NetworkFailure>,
    pub suggestions: Vec<String>,
    pub has_screenshot: bool,
}

impl FailureEntry {
    pub fn from_step(meta: &RunMeta, step: &StepRecord) -> Self {
        Self {
            run_id: meta.run_id.clone(),
            journey_id: meta.journey_id.clone(),
            step_number: step.step_number,
            step_name: step.step_name.clone(),
            timestamp: step.timestamp,
            console_errors: step.console_errors.clone(),
            network_failures: step.network_failures.clone(),
            suggestions: step.suggestions.clone(),
            has_screenshot: step.screenshot.is_some(),
        }
    }

    pub fn key(&self) -> (String, u32) {
        (self.run_id.clone(), self.step_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReportEntry {
    pub run_id: String,
    pub report_id: String,
    pub journey_id: String,
    pub report_type: ReportType,
    pub title: String,
    pub priority: Priority,
    pub related_steps: Vec<u32>,
    pub affected_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingReportEntry {
    pub fn from_report(report: &ReportRecord) -> Self {
        Self {
            run_id: report.run_id.clone(),
            report_id: report.report_id.clone(),
            journey_id: report.journey_id.clone(),
            report_type: report.report_type,
            title: report.title.clone(),
            priority: report.priority,
            related_steps: report.related_steps.clone(),
            affected_files: report.affected_files.clone(),
            created_at: report.created_at,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.run_id.clone(), self.report_id.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl PriorityCounts {
    pub fn add(&mut self, priority: Priority) {
        match priority {
            Priority::Low => self.low += 1,
            Priority::Medium => self.medium += 1,
            Priority::High => self.high += 1,
            Priority::Critical => self.critical += 1,
        }
    }

    pub fn merge(&mut self, other: &PriorityCounts) {
        self.low += other.low;
        self.medium += other.medium;
        self.high += other.high;
        self.critical += other.critical;
    }
}

/// One run's contribution to the summary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTally {
    pub journey_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub steps: StepCounts,
    pub failures_open: usize,
    pub failures_acknowledged: usize,
    pub reports_pending: usize,
    pub reports_actioned: usize,
    pub pending_by_priority: PriorityCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub total_runs: usize,
    pub runs_running: usize,
    pub runs_passed: usize,
    pub runs_failed: usize,
    pub total_steps: usize,
    pub steps_passed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    /// pass / (pass + fail); skips carry no verdict.
    pub pass_rate: f64,
    pub failures_open: usize,
    pub failures_acknowledged: usize,
    pub reports_pending: usize,
    pub reports_actioned: usize,
    pub pending_by_priority: PriorityCounts,
}

impl Summary {
    pub fn from_tallies<'a>(
        tallies: impl IntoIterator<Item = &'a RunTally>,
        now: DateTime<Utc>,
        idle: Duration,
    ) -> Self {
        let mut summary = Summary {
            generated_at: now,
            total_runs: 0,
            runs_running: 0,
            runs_passed: 0,
            runs_failed: 0,
            total_steps: 0,
            steps_passed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            pass_rate: 0.0,
            failures_open: 0,
            failures_acknowledged: 0,
            reports_pending: 0,
            reports_actioned: 0,
            pending_by_priority: PriorityCounts::default(),
        };

        for tally in tallies {
            summary.total_runs += 1;
            match derive_run_status(&tally.steps, tally.last_activity_at, now, idle) {
                RunStatus::Running => summary.runs_running += 1,
                RunStatus::Passed => summary.runs_passed += 1,
                RunStatus::Failed => summary.runs_failed += 1,
            }
            summary.total_steps += tally.steps.total;
            summary.steps_passed += tally.steps.pass;
            summary.steps_failed += tally.steps.fail;
            summary.steps_skipped += tally.steps.skip;
            summary.failures_open += tally.failures_open;
            summary.failures_acknowledged += tally.failures_acknowledged;
            summary.reports_pending += tally.reports_pending;
            summary.reports_actioned += tally.reports_actioned;
            summary.pending_by_priority.merge(&tally.pending_by_priority);
        }

        let verdicts = summary.steps_passed + summary.steps_failed;
        if verdicts > 0 {
            summary.pass_rate = summary.steps_passed as f64 / verdicts as f64;
        }
        summary
    }
}

// ============================================================================
// Operation results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitStepResponse {
    pub run_id: String,
    pub step_number: u32,
    pub run_status: RunStatus,
    pub counts: StepCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReportResponse {
    pub run_id: String,
    pub report_id: String,
    /// Non-fatal findings, e.g. related steps not (yet) present in the run.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureState {
    pub run_id: String,
    pub step_number: u32,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub action_taken: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    pub run_id: String,
    pub report_id: String,
    pub status: ReportStatus,
    pub actioned_at: Option<DateTime<Utc>>,
    pub action_taken: Option<String>,
}

/// Result of a lifecycle mutation. `changed == false` means the target was
/// already terminal and `state` is the prior, untouched state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome<S> {
    pub changed: bool,
    #[serde(flatten)]
    pub state: S,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_round_trip() {
        let started = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 5).unwrap()
            + Duration::milliseconds(123);
        let key = RunKey::new(started, "onboarding").unwrap();
        assert_eq!(key.run_id(), "20261019T083005123Z_onboarding");
        assert_eq!(RunKey::parse(&key.run_id()).unwrap(), key);
    }

    #[test]
    fn test_run_id_keeps_underscores_in_journey() {
        let started = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let key = RunKey::new(started, "checkout_guest").unwrap();
        let parsed = RunKey::parse(&key.run_id()).unwrap();
        assert_eq!(parsed.journey_id, "checkout_guest");
    }

    #[test]
    fn test_run_ids_sort_chronologically() {
        let early = RunKey::new(Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap(), "b").unwrap();
        let late = RunKey::new(Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap(), "a").unwrap();
        assert!(early.run_id() < late.run_id());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RunKey::parse("not-a-run").is_err());
        assert!(RunKey::parse("20261019T083005123Z_../etc").is_err());
        assert!(RunKey::parse("2026_onboarding").is_err());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("journey_id", "login-flow_2").is_ok());
        assert!(validate_identifier("journey_id", "").is_err());
        assert!(validate_identifier("journey_id", "a/b").is_err());
        assert!(validate_identifier("journey_id", &"x".repeat(129)).is_err());
    }

    #[test]
    fn test_step_number_must_be_positive() {
        assert!(validate_step_number(0).is_err());
        assert!(validate_step_number(-3).is_err());
        assert_eq!(validate_step_number(7).unwrap(), 7);
    }

    #[test]
    fn test_enums_reject_unknown_values() {
        assert!(serde_json::from_str::<StepStatus>("\"flaky\"").is_err());
        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
        assert_eq!(
            serde_json::from_str::<ReportType>("\"regression_analysis\"").unwrap(),
            ReportType::RegressionAnalysis
        );
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_run_status_rollup() {
        let now = Utc::now();
        let idle = Duration::minutes(30);
        let mut counts = StepCounts::default();
        counts.add(StepStatus::Pass);
        assert_eq!(derive_run_status(&counts, now, now, idle), RunStatus::Running);
        assert_eq!(
            derive_run_status(&counts, now - Duration::hours(1), now, idle),
            RunStatus::Passed
        );
        counts.add(StepStatus::Fail);
        assert_eq!(derive_run_status(&counts, now, now, idle), RunStatus::Failed);
    }

    #[test]
    fn test_summary_pass_rate_ignores_skips() {
        let now = Utc::now();
        let tally = RunTally {
            journey_id: "j".into(),
            started_at: now,
            last_activity_at: now,
            steps: StepCounts { pass: 3, fail: 1, skip: 4, total: 8 },
            failures_open: 1,
            failures_acknowledged: 0,
            reports_pending: 0,
            reports_actioned: 0,
            pending_by_priority: PriorityCounts::default(),
        };
        let summary = Summary::from_tallies([&tally], now, Duration::minutes(30));
        assert_eq!(summary.total_runs, 1);
        assert_eq!(summary.runs_failed, 1);
        assert!((summary.pass_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_summary() {
        let summary = Summary::from_tallies(std::iter::empty(), Utc::now(), Duration::minutes(30));
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.pass_rate, 0.0);
    }

    #[test]
    fn test_mutation_outcome_flattens_state() {
        let outcome = MutationOutcome {
            changed: false,
            state: ReportState {
                run_id: "r".into(),
                report_id: "rpt-1".into(),
                status: ReportStatus::Actioned,
                actioned_at: None,
                action_taken: Some("fixed".into()),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["changed"], false);
        assert_eq!(json["status"], "actioned");
        assert_eq!(json["action_taken"], "fixed");
    }
}
