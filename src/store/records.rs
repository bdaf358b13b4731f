//! Read side of the store: loading run directories back into records.
//! Shared by the store's operations and the index maintainer's scans.

use std::fs;
use std::io;

use super::atomic::{read_json, TEMP_PREFIX};
use super::layout::{parse_step_file_name, StoreLayout};
use crate::error::{FeedbackError, Result};
use crate::model::{ReportRecord, RunKey, RunMeta, RunRecord, StepRecord};

/// Names of all run directories, oldest first. Entries that are not valid
/// run ids are skipped.
pub fn list_run_ids(layout: &StoreLayout) -> Result<Vec<String>> {
    let entries = match fs::read_dir(layout.runs_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || RunKey::parse(&name).is_err() {
            continue;
        }
        ids.push(name);
    }
    ids.sort();
    Ok(ids)
}

pub fn load_meta(layout: &StoreLayout, run_id: &str) -> Result<RunMeta> {
    read_json(&layout.run_meta_path(run_id))?
        .ok_or_else(|| FeedbackError::NotFound(format!("run {}", run_id)))
}

pub fn load_step(layout: &StoreLayout, run_id: &str, step_number: u32) -> Result<Option<StepRecord>> {
    read_json(&layout.step_path(run_id, step_number))
}

/// All steps of a run ordered by step number.
pub fn load_steps(layout: &StoreLayout, run_id: &str) -> Result<Vec<StepRecord>> {
    let mut steps = Vec::new();
    let entries = match fs::read_dir(layout.run_dir(run_id)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(steps),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().to_string();
        let Some(step_number) = parse_step_file_name(&name) else {
            continue;
        };
        if let Some(step) = load_step(layout, run_id, step_number)? {
            steps.push(step);
        }
    }
    steps.sort_by_key(|s| s.step_number);
    Ok(steps)
}

pub fn load_report(layout: &StoreLayout, run_id: &str, report_id: &str) -> Result<Option<ReportRecord>> {
    read_json(&layout.report_path(run_id, report_id))
}

/// All reports of a run ordered by creation time, then id.
pub fn load_reports(layout: &StoreLayout, run_id: &str) -> Result<Vec<ReportRecord>> {
    let mut reports = Vec::new();
    let entries = match fs::read_dir(layout.reports_dir(run_id)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(reports),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().to_string();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let Some(report_id) = name.strip_suffix(".json") else {
            continue;
        };
        if let Some(report) = load_report(layout, run_id, report_id)? {
            reports.push(report);
        }
    }
    reports.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.report_id.cmp(&b.report_id))
    });
    Ok(reports)
}

pub fn load_run(layout: &StoreLayout, run_id: &str) -> Result<RunRecord> {
    let meta = load_meta(layout, run_id)?;
    let steps = load_steps(layout, run_id)?;
    let reports = load_reports(layout, run_id)?;
    Ok(RunRecord {
        meta,
        steps,
        reports,
    })
}
