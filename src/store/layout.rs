use std::path::{Path, PathBuf};

pub const RUNS_DIR: &str = "runs";
pub const RUN_META_FILE: &str = "run.json";
pub const REPORTS_DIR: &str = "reports";
pub const FAILURES_INDEX_FILE: &str = "unacknowledged-failures.json";
pub const REPORTS_INDEX_FILE: &str = "pending-reports.json";
pub const SUMMARY_INDEX_FILE: &str = "summary.json";

/// Path arithmetic for the on-disk store. Callers validate ids before they
/// reach here.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn run_meta_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(RUN_META_FILE)
    }

    pub fn step_path(&self, run_id: &str, step_number: u32) -> PathBuf {
        self.run_dir(run_id).join(step_file_name(step_number))
    }

    pub fn screenshot_path(&self, run_id: &str, step_number: u32) -> PathBuf {
        self.run_dir(run_id).join(screenshot_file_name(step_number))
    }

    pub fn reports_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(REPORTS_DIR)
    }

    pub fn report_path(&self, run_id: &str, report_id: &str) -> PathBuf {
        self.reports_dir(run_id).join(format!("{}.json", report_id))
    }

    pub fn failures_index_path(&self) -> PathBuf {
        self.root.join(FAILURES_INDEX_FILE)
    }

    pub fn reports_index_path(&self) -> PathBuf {
        self.root.join(REPORTS_INDEX_FILE)
    }

    pub fn summary_index_path(&self) -> PathBuf {
        self.root.join(SUMMARY_INDEX_FILE)
    }
}

pub fn step_file_name(step_number: u32) -> String {
    format!("step-{:04}.json", step_number)
}

pub fn screenshot_file_name(step_number: u32) -> String {
    format!("step-{:04}.png", step_number)
}

/// Inverse of [`step_file_name`]; anything else in a run directory is ignored.
pub fn parse_step_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("step-")?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n > 0)
}
