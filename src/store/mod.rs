pub mod atomic;
pub mod layout;
pub mod records;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::FeedbackConfig;
use crate::error::{FeedbackError, Result};
use crate::index::IndexMaintainer;
use crate::model::{
    require_text, validate_identifier, validate_step_number, AttachmentMeta, FailureEntry,
    FailureState, MutationOutcome, PendingReportEntry, ReportRecord, ReportState, ReportStatus,
    ReportSubmission, RunKey, RunMeta, RunRecord, RunStatus, StepCounts, StepRecord,
    StepSubmission, SubmitReportResponse, SubmitStepResponse, Summary,
};
use atomic::{remove_if_exists, write_atomic, write_json};
use layout::{screenshot_file_name, StoreLayout};

/// Filesystem-backed run store shared by both interfaces.
///
/// Within one process, writers serialize on `write_lock`. Separate
/// processes pointed at the same directory only share the guarantee of
/// atomic per-file replacement; a lost index update between them is
/// repaired by the read-side consistency checks.
pub struct FeedbackStore {
    layout: StoreLayout,
    run_idle: Duration,
    max_attachment_bytes: usize,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    /// Open (or create) the store and rebuild its indices from the run
    /// directories.
    pub fn open(config: &FeedbackConfig) -> Result<Self> {
        let layout = StoreLayout::new(&config.data_dir);
        fs::create_dir_all(layout.runs_dir())?;
        let store = Self {
            layout,
            run_idle: Duration::minutes(config.run_idle_minutes),
            max_attachment_bytes: config.max_attachment_bytes,
            write_lock: Mutex::new(()),
        };
        store.rebuild_indices()?;
        Ok(store)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn run_idle(&self) -> Duration {
        self.run_idle
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn indices(&self) -> IndexMaintainer<'_> {
        IndexMaintainer::new(&self.layout, self.run_idle)
    }

    fn load_run_checked(&self, key: &RunKey) -> Result<RunRecord> {
        let run_id = key.run_id();
        if !self.layout.run_dir(&run_id).is_dir() {
            return Err(FeedbackError::NotFound(format!("run {}", run_id)));
        }
        records::load_run(&self.layout, &run_id)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Validate a step submission, resolve which run it belongs to and
    /// persist it. Nothing is written when validation fails.
    pub fn submit_step(&self, submission: StepSubmission) -> Result<SubmitStepResponse> {
        validate_identifier("journey_id", &submission.journey_id)?;
        let step_number = validate_step_number(submission.step_number)?;
        require_text("step_name", &submission.step_name)?;
        let explicit_key = match &submission.run_id {
            Some(run_id) => {
                let key = RunKey::parse(run_id)?;
                if key.journey_id != submission.journey_id {
                    return Err(FeedbackError::Validation(format!(
                        "run {} belongs to journey {}, not {}",
                        run_id, key.journey_id, submission.journey_id
                    )));
                }
                Some(key)
            }
            None => None,
        };
        let screenshot = match &submission.screenshot_hex {
            Some(encoded) => {
                let bytes = hex::decode(encoded.trim()).map_err(|e| {
                    FeedbackError::Validation(format!("screenshot_hex is not valid hex: {}", e))
                })?;
                self.check_attachment_size(bytes.len())?;
                Some(bytes)
            }
            None => None,
        };

        let now = Utc::now();
        let timestamp = submission.timestamp.unwrap_or(now);
        let step = StepRecord {
            step_number,
            step_name: submission.step_name,
            status: submission.status,
            console_errors: submission.console_errors,
            network_failures: submission.network_failures,
            suggestions: submission.suggestions,
            screenshot: None,
            timestamp,
            acknowledged: false,
            acknowledged_at: None,
            action_taken: None,
        };

        let _guard = self.lock();
        let key = match explicit_key {
            Some(key) => key,
            None => self.resolve_open_run(&submission.journey_id, timestamp, now)?,
        };
        let meta = self.append_step_locked(&key, step, screenshot.as_deref())?;

        Ok(SubmitStepResponse {
            run_id: meta.run_id,
            step_number,
            run_status: meta.status,
            counts: meta.counts,
        })
    }

    /// Newest run of the journey that is still within the idle window, or
    /// a fresh key starting at `started_at`.
    fn resolve_open_run(
        &self,
        journey_id: &str,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RunKey> {
        if let Some(run_id) = self.latest_run_id(journey_id)? {
            match records::load_meta(&self.layout, &run_id) {
                Ok(meta) if now - meta.last_activity_at <= self.run_idle => {
                    return RunKey::parse(&run_id);
                }
                Ok(_) => debug!(run_id = %run_id, "Latest run is idle, starting a new one"),
                Err(e) => warn!(run_id = %run_id, "Latest run unreadable, starting a new one: {}", e),
            }
        }
        RunKey::new(started_at, journey_id)
    }

    fn latest_run_id(&self, journey_id: &str) -> Result<Option<String>> {
        Ok(records::list_run_ids(&self.layout)?
            .into_iter()
            .rev()
            .find(|id| RunKey::parse(id).is_ok_and(|k| k.journey_id == journey_id)))
    }

    /// Write `step` into the run, creating the run directory when needed.
    /// A step with the same number is replaced wholesale, except that an
    /// earlier acknowledgment carries over.
    pub fn create_or_append_step(&self, key: &RunKey, step: StepRecord) -> Result<RunMeta> {
        validate_step_record(&step)?;
        let _guard = self.lock();
        self.append_step_locked(key, step, None)
    }

    fn append_step_locked(
        &self,
        key: &RunKey,
        mut step: StepRecord,
        screenshot: Option<&[u8]>,
    ) -> Result<RunMeta> {
        let run_id = key.run_id();
        let now = Utc::now();
        fs::create_dir_all(self.layout.run_dir(&run_id))?;

        // Screenshot lands before the step record that references it.
        let screenshot_path = self.layout.screenshot_path(&run_id, step.step_number);
        match screenshot {
            Some(bytes) => {
                write_atomic(&screenshot_path, bytes)?;
                step.screenshot = Some(attachment_meta(step.step_number, bytes));
            }
            None => {
                step.screenshot = None;
                remove_if_exists(&screenshot_path)?;
            }
        }

        let step_number = step.step_number;
        let step_path = self.layout.step_path(&run_id, step_number);
        let replaced = step_path.exists();
        if replaced {
            // A failure never reopens: acknowledgment survives resubmission.
            match records::load_step(&self.layout, &run_id, step_number) {
                Ok(Some(previous)) if previous.acknowledged => {
                    step.acknowledged = true;
                    step.acknowledged_at = previous.acknowledged_at;
                    step.action_taken = previous.action_taken;
                }
                Ok(_) => {}
                Err(e) => warn!(run_id = %run_id, step_number, "Replacing unreadable step: {}", e),
            }
        }
        write_json(&step_path, &step)?;

        let mut run = records::load_run(&self.layout, &run_id).or_else(|e| match e {
            FeedbackError::NotFound(_) => Ok(RunRecord {
                meta: RunMeta {
                    run_id: run_id.clone(),
                    journey_id: key.journey_id.clone(),
                    started_at: key.started_at,
                    last_activity_at: now,
                    status: RunStatus::Running,
                    counts: StepCounts::default(),
                    revision: 0,
                },
                steps: records::load_steps(&self.layout, &run_id)?,
                reports: Vec::new(),
            }),
            other => Err(other),
        })?;
        run.meta.counts = StepCounts::from_steps(&run.steps);
        run.meta.last_activity_at = now;
        run.meta.refresh_status(now, self.run_idle);
        run.meta.revision += 1;
        write_json(&self.layout.run_meta_path(&run_id), &run.meta)?;

        info!(
            run_id = %run_id,
            step_number,
            status = ?step.status,
            replaced,
            "Stored step result"
        );

        self.indices().refresh_run(&run)?;
        Ok(run.meta)
    }

    /// Record a write into the run. Called after the record itself is on
    /// disk, so a reader that sees the new revision also sees the record.
    fn bump_revision(&self, run: &mut RunRecord) -> Result<()> {
        run.meta.revision += 1;
        write_json(&self.layout.run_meta_path(&run.meta.run_id), &run.meta)
    }

    fn check_attachment_size(&self, len: usize) -> Result<()> {
        if len > self.max_attachment_bytes {
            return Err(FeedbackError::Validation(format!(
                "screenshot is {} bytes, limit is {}",
                len, self.max_attachment_bytes
            )));
        }
        Ok(())
    }

    /// Store a screenshot for an existing step.
    pub fn attach_screenshot(
        &self,
        key: &RunKey,
        step_number: u32,
        bytes: &[u8],
    ) -> Result<AttachmentMeta> {
        self.check_attachment_size(bytes.len())?;
        let run_id = key.run_id();
        let _guard = self.lock();
        let mut step = records::load_step(&self.layout, &run_id, step_number)?.ok_or_else(|| {
            FeedbackError::NotFound(format!("step {} of run {}", step_number, run_id))
        })?;

        write_atomic(&self.layout.screenshot_path(&run_id, step_number), bytes)?;
        let meta = attachment_meta(step_number, bytes);
        step.screenshot = Some(meta.clone());
        write_json(&self.layout.step_path(&run_id, step_number), &step)?;
        info!(run_id = %run_id, step_number, size = bytes.len(), "Stored screenshot");

        let mut run = records::load_run(&self.layout, &run_id)?;
        self.bump_revision(&mut run)?;
        self.indices().refresh_run(&run)?;
        Ok(meta)
    }

    pub fn read_screenshot(&self, key: &RunKey, step_number: u32) -> Result<Vec<u8>> {
        let run_id = key.run_id();
        match fs::read(self.layout.screenshot_path(&run_id, step_number)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FeedbackError::NotFound(
                format!("screenshot for step {} of run {}", step_number, run_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate a report submission, attach it to its run and persist it.
    pub fn submit_report(&self, submission: ReportSubmission) -> Result<SubmitReportResponse> {
        validate_identifier("journey_id", &submission.journey_id)?;
        require_text("title", &submission.title)?;
        if let Some(report_id) = &submission.report_id {
            validate_identifier("report_id", report_id)?;
        }
        let related_steps = submission
            .related_steps
            .iter()
            .map(|n| validate_step_number(*n))
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.lock();
        let key = match &submission.run_id {
            Some(run_id) => {
                let key = RunKey::parse(run_id)?;
                if key.journey_id != submission.journey_id {
                    return Err(FeedbackError::Validation(format!(
                        "run {} belongs to journey {}, not {}",
                        run_id, key.journey_id, submission.journey_id
                    )));
                }
                key
            }
            None => {
                let run_id = self.latest_run_id(&submission.journey_id)?.ok_or_else(|| {
                    FeedbackError::NotFound(format!("no run for journey {}", submission.journey_id))
                })?;
                RunKey::parse(&run_id)?
            }
        };
        let run_id = key.run_id();
        if !self.layout.run_dir(&run_id).is_dir() {
            return Err(FeedbackError::NotFound(format!("run {}", run_id)));
        }

        let report_id = match submission.report_id {
            Some(id) => id,
            None => self.assign_report_id(&run_id),
        };

        let report = ReportRecord {
            report_id: report_id.clone(),
            run_id: run_id.clone(),
            journey_id: submission.journey_id,
            report_type: submission.report_type,
            title: submission.title,
            markdown_content: submission.markdown_content,
            related_steps,
            priority: submission.priority,
            affected_files: submission.affected_files,
            status: ReportStatus::Pending,
            action_taken: None,
            actioned_at: None,
            created_at: submission.timestamp.unwrap_or_else(Utc::now),
        };
        let warnings = self.write_report_locked(&key, report)?;

        Ok(SubmitReportResponse {
            run_id,
            report_id,
            warnings,
        })
    }

    fn assign_report_id(&self, run_id: &str) -> String {
        loop {
            let candidate = format!("rpt-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
            if !self.layout.report_path(run_id, &candidate).exists() {
                return candidate;
            }
        }
    }

    /// Persist a new report. Returns warnings for related steps the run does
    /// not (yet) contain.
    pub fn write_report(&self, key: &RunKey, report: ReportRecord) -> Result<Vec<String>> {
        validate_identifier("report_id", &report.report_id)?;
        require_text("title", &report.title)?;
        let _guard = self.lock();
        self.write_report_locked(key, report)
    }

    fn write_report_locked(&self, key: &RunKey, report: ReportRecord) -> Result<Vec<String>> {
        let run_id = key.run_id();
        let path = self.layout.report_path(&run_id, &report.report_id);
        if path.exists() {
            return Err(FeedbackError::Validation(format!(
                "report_id {} already exists in run {}",
                report.report_id, run_id
            )));
        }

        let mut run = self.load_run_checked(key)?;
        let warnings: Vec<String> = report
            .related_steps
            .iter()
            .filter(|n| !run.steps.iter().any(|s| s.step_number == **n))
            .map(|n| format!("related step {} is not present in run {}", n, run_id))
            .collect();
        for warning in &warnings {
            warn!(report_id = %report.report_id, "{}", warning);
        }

        write_json(&path, &report)?;
        info!(
            run_id = %run_id,
            report_id = %report.report_id,
            report_type = ?report.report_type,
            priority = ?report.priority,
            "Stored analysis report"
        );

        run.reports.push(report);
        self.bump_revision(&mut run)?;
        self.indices().refresh_run(&run)?;
        Ok(warnings)
    }

    // ========================================================================
    // Lifecycle mutations
    // ========================================================================

    /// Acknowledge a failing step. Already-acknowledged failures are left
    /// untouched and reported with `changed == false`.
    pub fn mutate_failure_state(
        &self,
        key: &RunKey,
        step_number: u32,
        action_taken: &str,
    ) -> Result<MutationOutcome<FailureState>> {
        require_text("action_taken", action_taken)?;
        let run_id = key.run_id();
        let _guard = self.lock();

        let mut run = self.load_run_checked(key)?;
        let step = run
            .steps
            .iter_mut()
            .find(|s| s.step_number == step_number)
            .ok_or_else(|| FeedbackError::NotFound(format!("step {} of run {}", step_number, run_id)))?;
        if !step.is_failure() {
            return Err(FeedbackError::NotFound(format!(
                "failure for step {} of run {} (step status is {:?})",
                step_number, run_id, step.status
            )));
        }

        if step.acknowledged {
            debug!(run_id = %run_id, step_number, "Failure already acknowledged");
            return Ok(MutationOutcome {
                changed: false,
                state: failure_state(&run_id, step),
            });
        }

        step.acknowledged = true;
        step.acknowledged_at = Some(Utc::now());
        step.action_taken = Some(action_taken.to_string());
        write_json(&self.layout.step_path(&run_id, step_number), &*step)?;
        let state = failure_state(&run_id, step);
        info!(run_id = %run_id, step_number, "Acknowledged failure");

        self.bump_revision(&mut run)?;
        self.indices().refresh_run(&run)?;
        Ok(MutationOutcome {
            changed: true,
            state,
        })
    }

    /// Mark a report actioned. Already-actioned reports are left untouched
    /// and reported with `changed == false`.
    pub fn mutate_report_state(
        &self,
        key: &RunKey,
        report_id: &str,
        action_taken: &str,
    ) -> Result<MutationOutcome<ReportState>> {
        validate_identifier("report_id", report_id)?;
        require_text("action_taken", action_taken)?;
        let run_id = key.run_id();
        let _guard = self.lock();

        let mut run = self.load_run_checked(key)?;
        let report = run
            .reports
            .iter_mut()
            .find(|r| r.report_id == report_id)
            .ok_or_else(|| FeedbackError::NotFound(format!("report {} of run {}", report_id, run_id)))?;

        if !report.is_pending() {
            debug!(run_id = %run_id, report_id, "Report already actioned");
            return Ok(MutationOutcome {
                changed: false,
                state: report_state(report),
            });
        }

        report.status = ReportStatus::Actioned;
        report.actioned_at = Some(Utc::now());
        report.action_taken = Some(action_taken.to_string());
        write_json(&self.layout.report_path(&run_id, report_id), &*report)?;
        let state = report_state(report);
        info!(run_id = %run_id, report_id, "Marked report actioned");

        self.bump_revision(&mut run)?;
        self.indices().refresh_run(&run)?;
        Ok(MutationOutcome {
            changed: true,
            state,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_run(&self, key: &RunKey) -> Result<RunRecord> {
        let mut run = self.load_run_checked(key)?;
        run.meta.refresh_status(Utc::now(), self.run_idle);
        Ok(run)
    }

    pub fn get_report(&self, key: &RunKey, report_id: &str) -> Result<ReportRecord> {
        validate_identifier("report_id", report_id)?;
        let run_id = key.run_id();
        records::load_report(&self.layout, &run_id, report_id)?
            .ok_or_else(|| FeedbackError::NotFound(format!("report {} of run {}", report_id, run_id)))
    }

    /// Most recent runs first, optionally restricted to one journey.
    pub fn list_runs(&self, limit: usize, journey_id: Option<&str>) -> Result<Vec<RunMeta>> {
        let now = Utc::now();
        let mut runs = Vec::new();
        for run_id in records::list_run_ids(&self.layout)?.into_iter().rev() {
            if runs.len() >= limit {
                break;
            }
            if let Some(journey) = journey_id {
                if !RunKey::parse(&run_id).is_ok_and(|k| k.journey_id == journey) {
                    continue;
                }
            }
            match records::load_meta(&self.layout, &run_id) {
                Ok(mut meta) => {
                    meta.refresh_status(now, self.run_idle);
                    runs.push(meta);
                }
                Err(e) => warn!(run_id = %run_id, "Skipping unreadable run: {}", e),
            }
        }
        Ok(runs)
    }

    pub fn run_count(&self) -> Result<usize> {
        Ok(records::list_run_ids(&self.layout)?.len())
    }

    /// Unacknowledged failures whose step timestamp falls inside `window`,
    /// newest first.
    pub fn list_recent_failures(&self, window: Duration) -> Result<Vec<FailureEntry>> {
        let indices = self.indices();
        let index = match indices.load_failures() {
            Some(index) if indices.failures_consistent(&index)? => index,
            _ => {
                warn!("Failure index stale or missing, rebuilding");
                self.rebuild_indices()?;
                indices.load_failures().ok_or_else(|| {
                    FeedbackError::Other("failure index missing after rebuild".to_string())
                })?
            }
        };
        let cutoff = Utc::now() - window;
        Ok(index
            .entries
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect())
    }

    pub fn list_pending_reports(&self) -> Result<Vec<PendingReportEntry>> {
        let indices = self.indices();
        match indices.load_reports() {
            Some(index) if indices.reports_consistent(&index)? => Ok(index.entries),
            _ => {
                warn!("Pending report index stale or missing, rebuilding");
                self.rebuild_indices()?;
                indices.load_reports().map(|i| i.entries).ok_or_else(|| {
                    FeedbackError::Other("report index missing after rebuild".to_string())
                })
            }
        }
    }

    pub fn summary(&self) -> Result<Summary> {
        let indices = self.indices();
        match indices.load_summary() {
            Some(index) if indices.summary_consistent(&index)? => Ok(indices.current_totals(&index)),
            _ => {
                warn!("Summary index stale or missing, rebuilding");
                self.rebuild_indices()
            }
        }
    }

    /// Full rebuild of all three indices from the run directories.
    pub fn rebuild_indices(&self) -> Result<Summary> {
        let _guard = self.lock();
        self.indices().rebuild_all()
    }
}

/// Checks for records that bypass [`FeedbackStore::submit_step`].
fn validate_step_record(step: &StepRecord) -> Result<()> {
    if step.step_number == 0 {
        return Err(FeedbackError::Validation(
            "step_number must be a positive integer".to_string(),
        ));
    }
    require_text("step_name", &step.step_name)
}

fn attachment_meta(step_number: u32, bytes: &[u8]) -> AttachmentMeta {
    AttachmentMeta {
        file_name: screenshot_file_name(step_number),
        size_bytes: bytes.len() as u64,
        sha256: hex::encode(Sha256::digest(bytes)),
    }
}

fn failure_state(run_id: &str, step: &StepRecord) -> FailureState {
    FailureState {
        run_id: run_id.to_string(),
        step_number: step.step_number,
        acknowledged: step.acknowledged,
        acknowledged_at: step.acknowledged_at,
        action_taken: step.action_taken.clone(),
    }
}

fn report_state(report: &ReportRecord) -> ReportState {
    ReportState {
        run_id: report.run_id.clone(),
        report_id: report.report_id.clone(),
        status: report.status,
        actioned_at: report.actioned_at,
        action_taken: report.action_taken.clone(),
    }
}
