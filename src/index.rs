//! Derived indices over the run directories.
//!
//! The three index files are materialized views: the per-run step and
//! report records are the source of truth and every index can be rebuilt
//! from them at any time. Writers refresh the entries of the run they
//! touched; readers validate what they load and fall back to a full
//! rebuild when the view has drifted from the records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{
    FailureEntry, PendingReportEntry, PriorityCounts, RunRecord, RunTally, StepCounts, Summary,
};
use crate::store::atomic::{read_json, write_json};
use crate::store::layout::StoreLayout;
use crate::store::records;

/// `run_id` -> the `run.json` revision an index file was derived from.
pub type RunRevisions = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureIndex {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub revisions: RunRevisions,
    pub entries: Vec<FailureEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportIndex {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub revisions: RunRevisions,
    pub entries: Vec<PendingReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryIndex {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub revisions: RunRevisions,
    pub runs: BTreeMap<String, RunTally>,
    pub totals: Summary,
}

/// Newest failure first.
fn sort_failures(entries: &mut [FailureEntry]) {
    entries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.run_id.cmp(&a.run_id))
            .then_with(|| a.step_number.cmp(&b.step_number))
    });
}

/// Most urgent first, then newest.
fn sort_reports(entries: &mut [PendingReportEntry]) {
    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.run_id.cmp(&b.run_id))
            .then_with(|| a.report_id.cmp(&b.report_id))
    });
}

// ============================================================================
// Derivation from records
// ============================================================================

pub fn derive_failures(run: &RunRecord) -> Vec<FailureEntry> {
    run.steps
        .iter()
        .filter(|s| s.is_open_failure())
        .map(|s| FailureEntry::from_step(&run.meta, s))
        .collect()
}

pub fn derive_pending_reports(run: &RunRecord) -> Vec<PendingReportEntry> {
    run.reports
        .iter()
        .filter(|r| r.is_pending())
        .map(PendingReportEntry::from_report)
        .collect()
}

pub fn derive_tally(run: &RunRecord) -> RunTally {
    let mut tally = RunTally {
        journey_id: run.meta.journey_id.clone(),
        started_at: run.meta.started_at,
        last_activity_at: run.meta.last_activity_at,
        steps: StepCounts::from_steps(&run.steps),
        failures_open: 0,
        failures_acknowledged: 0,
        reports_pending: 0,
        reports_actioned: 0,
        pending_by_priority: PriorityCounts::default(),
    };
    for step in run.steps.iter().filter(|s| s.is_failure()) {
        if step.acknowledged {
            tally.failures_acknowledged += 1;
        } else {
            tally.failures_open += 1;
        }
    }
    for report in &run.reports {
        if report.is_pending() {
            tally.reports_pending += 1;
            tally.pending_by_priority.add(report.priority);
        } else {
            tally.reports_actioned += 1;
        }
    }
    tally
}

// ============================================================================
// Maintainer
// ============================================================================

pub struct IndexMaintainer<'a> {
    layout: &'a StoreLayout,
    run_idle: Duration,
}

impl<'a> IndexMaintainer<'a> {
    pub fn new(layout: &'a StoreLayout, run_idle: Duration) -> Self {
        Self { layout, run_idle }
    }

    /// Load an index file, treating an unparsable file like a missing one.
    fn load<T: serde::de::DeserializeOwned>(&self, path: &std::path::Path) -> Option<T> {
        match read_json(path) {
            Ok(value) => value,
            Err(e) => {
                warn!("Index file {:?} is unreadable, will rebuild: {}", path, e);
                None
            }
        }
    }

    pub fn load_failures(&self) -> Option<FailureIndex> {
        self.load(&self.layout.failures_index_path())
    }

    pub fn load_reports(&self) -> Option<ReportIndex> {
        self.load(&self.layout.reports_index_path())
    }

    pub fn load_summary(&self) -> Option<SummaryIndex> {
        self.load(&self.layout.summary_index_path())
    }

    /// Replace every index entry belonging to `run` with entries derived
    /// from its current records. Falls back to a full rebuild when any
    /// index file is missing or corrupt.
    pub fn refresh_run(&self, run: &RunRecord) -> Result<()> {
        let (Some(mut failures), Some(mut reports), Some(mut summary)) =
            (self.load_failures(), self.load_reports(), self.load_summary())
        else {
            self.rebuild_all()?;
            return Ok(());
        };

        let run_id = &run.meta.run_id;
        let revision = run.meta.revision;
        let now = Utc::now();

        failures.revisions.insert(run_id.clone(), revision);
        failures.entries.retain(|e| &e.run_id != run_id);
        failures.entries.extend(derive_failures(run));
        sort_failures(&mut failures.entries);
        failures.generated_at = now;
        write_json(&self.layout.failures_index_path(), &failures)?;

        reports.revisions.insert(run_id.clone(), revision);
        reports.entries.retain(|e| &e.run_id != run_id);
        reports.entries.extend(derive_pending_reports(run));
        sort_reports(&mut reports.entries);
        reports.generated_at = now;
        write_json(&self.layout.reports_index_path(), &reports)?;

        summary.revisions.insert(run_id.clone(), revision);
        summary.runs.insert(run_id.clone(), derive_tally(run));
        summary.totals = Summary::from_tallies(summary.runs.values(), now, self.run_idle);
        summary.generated_at = now;
        write_json(&self.layout.summary_index_path(), &summary)?;

        debug!(run_id = %run_id, "Refreshed index entries");
        Ok(())
    }

    /// Scan every run directory and replace all three index files.
    pub fn rebuild_all(&self) -> Result<Summary> {
        let now = Utc::now();
        let mut failures = Vec::new();
        let mut reports = Vec::new();
        let mut runs = BTreeMap::new();
        let mut revisions = RunRevisions::new();

        for run_id in records::list_run_ids(self.layout)? {
            let run = match records::load_run(self.layout, &run_id) {
                Ok(run) => run,
                Err(e) => {
                    warn!(run_id = %run_id, "Skipping unreadable run during rebuild: {}", e);
                    // Still record the revision so the skip does not read as
                    // drift and trigger another rebuild on every query.
                    if let Ok(meta) = records::load_meta(self.layout, &run_id) {
                        revisions.insert(run_id, meta.revision);
                    }
                    continue;
                }
            };
            revisions.insert(run_id.clone(), run.meta.revision);
            failures.extend(derive_failures(&run));
            reports.extend(derive_pending_reports(&run));
            runs.insert(run_id, derive_tally(&run));
        }

        sort_failures(&mut failures);
        sort_reports(&mut reports);
        let totals = Summary::from_tallies(runs.values(), now, self.run_idle);

        write_json(
            &self.layout.failures_index_path(),
            &FailureIndex {
                generated_at: now,
                revisions: revisions.clone(),
                entries: failures,
            },
        )?;
        write_json(
            &self.layout.reports_index_path(),
            &ReportIndex {
                generated_at: now,
                revisions: revisions.clone(),
                entries: reports,
            },
        )?;
        write_json(
            &self.layout.summary_index_path(),
            &SummaryIndex {
                generated_at: now,
                revisions,
                runs,
                totals: totals.clone(),
            },
        )?;

        info!(
            runs = totals.total_runs,
            open_failures = totals.failures_open,
            pending_reports = totals.reports_pending,
            "Rebuilt indices"
        );
        Ok(totals)
    }

    // ========================================================================
    // Consistency checks
    // ========================================================================

    /// Revision of every run whose `run.json` is readable.
    pub fn disk_revisions(&self) -> Result<RunRevisions> {
        let mut revisions = RunRevisions::new();
        for run_id in records::list_run_ids(self.layout)? {
            match records::load_meta(self.layout, &run_id) {
                Ok(meta) => {
                    revisions.insert(run_id, meta.revision);
                }
                Err(e) => debug!(run_id = %run_id, "Run metadata unreadable: {}", e),
            }
        }
        Ok(revisions)
    }

    /// An index file is current only if it was derived from exactly the
    /// runs on disk, each at its current revision. This catches entries
    /// that are missing, not just entries that point at stale records.
    fn covers_disk(&self, recorded: &RunRevisions) -> Result<bool> {
        Ok(*recorded == self.disk_revisions()?)
    }

    /// Every entry must still name an existing, failing, unacknowledged step.
    pub fn failures_consistent(&self, index: &FailureIndex) -> Result<bool> {
        if !self.covers_disk(&index.revisions)? {
            return Ok(false);
        }
        Ok(index.entries.iter().all(|entry| {
            match records::load_step(self.layout, &entry.run_id, entry.step_number) {
                Ok(Some(step)) => step.is_open_failure() && step.timestamp == entry.timestamp,
                _ => false,
            }
        }))
    }

    /// Every entry must still name an existing, pending report.
    pub fn reports_consistent(&self, index: &ReportIndex) -> Result<bool> {
        if !self.covers_disk(&index.revisions)? {
            return Ok(false);
        }
        Ok(index.entries.iter().all(|entry| {
            match records::load_report(self.layout, &entry.run_id, &entry.report_id) {
                Ok(Some(report)) => report.is_pending(),
                _ => false,
            }
        }))
    }

    pub fn summary_consistent(&self, index: &SummaryIndex) -> Result<bool> {
        self.covers_disk(&index.revisions)
    }

    /// Recompute summary totals from the stored tallies against `now`, so
    /// runs that went idle since the last write show up as closed.
    pub fn current_totals(&self, index: &SummaryIndex) -> Summary {
        Summary::from_tallies(index.runs.values(), Utc::now(), self.run_idle)
    }
}

/// Set view used to compare an incrementally maintained index with a
/// rebuilt one.
pub fn failure_keys(index: &FailureIndex) -> HashMap<(String, u32), FailureEntry> {
    index.entries.iter().map(|e| (e.key(), e.clone())).collect()
}

pub fn report_keys(index: &ReportIndex) -> HashMap<(String, String), PendingReportEntry> {
    index.entries.iter().map(|e| (e.key(), e.clone())).collect()
}
