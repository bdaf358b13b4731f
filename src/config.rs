use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::settings::PersistentSettings;

/// Qontinui Feedback: coordinates test verdicts between the test agent
/// and the remediation agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "qontinui-feedback")]
pub struct CliArgs {
    /// Root directory of the run store
    #[arg(short = 'd', long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Address the ingestion HTTP server binds to
    #[arg(long = "bind", default_value = DEFAULT_BIND_ADDR)]
    pub bind: String,

    /// Ingestion HTTP port
    #[arg(long = "port", default_value_t = DEFAULT_FEEDBACK_PORT)]
    pub port: u16,

    /// Minutes without a new step after which a run is considered closed
    #[arg(long = "run-idle-minutes")]
    pub run_idle_minutes: Option<i64>,

    /// Default window for listing unacknowledged failures
    #[arg(long = "failure-window-hours")]
    pub failure_window_hours: Option<i64>,

    /// Upper bound for a single screenshot upload
    #[arg(long = "max-attachment-mb")]
    pub max_attachment_mb: Option<usize>,

    /// Directory for daily rolling log files (stderr only when unset)
    #[arg(short = 'l', long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the ingestion interface over HTTP (default)
    Serve {
        /// Also attach the query/action tool interface to stdio
        #[arg(long = "with-tools")]
        with_tools: bool,
    },
    /// Serve only the query/action tool interface over stdio
    Tools,
    /// Rebuild all indices from the run directories and exit
    RebuildIndex,
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub data_dir: PathBuf,
    pub bind: String,
    pub port: u16,
    pub run_idle_minutes: i64,
    pub failure_window_hours: i64,
    pub max_attachment_bytes: usize,
    pub log_dir: Option<PathBuf>,
}

pub const DEFAULT_DATA_DIR: &str = ".feedback";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_FEEDBACK_PORT: u16 = 9877;
pub const SETTINGS_FILE: &str = "feedback-settings.json";

// Run lifecycle
pub const DEFAULT_RUN_IDLE_MINUTES: i64 = 30;
pub const DEFAULT_FAILURE_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_RUN_LIST_LIMIT: usize = 20;

// Attachments
pub const DEFAULT_MAX_ATTACHMENT_MB: usize = 10;

// Stdio protocol
pub const TOOLS_PROTOCOL_VERSION: &str = "2024-11-05";

impl FeedbackConfig {
    /// CLI flags win over the settings file, which wins over the defaults.
    pub fn from_args(args: CliArgs, settings: &PersistentSettings) -> Self {
        let max_attachment_mb = args
            .max_attachment_mb
            .or(settings.max_attachment_mb)
            .unwrap_or(DEFAULT_MAX_ATTACHMENT_MB);

        FeedbackConfig {
            data_dir: args.data_dir,
            bind: args.bind,
            port: args.port,
            run_idle_minutes: args
                .run_idle_minutes
                .or(settings.run_idle_minutes)
                .unwrap_or(DEFAULT_RUN_IDLE_MINUTES)
                .max(1),
            failure_window_hours: args
                .failure_window_hours
                .or(settings.failure_window_hours)
                .unwrap_or(DEFAULT_FAILURE_WINDOW_HOURS)
                .max(1),
            max_attachment_bytes: max_attachment_mb.max(1) * 1024 * 1024,
            log_dir: args.log_dir,
        }
    }

    /// Configuration with built-in defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        FeedbackConfig {
            data_dir: data_dir.into(),
            bind: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_FEEDBACK_PORT,
            run_idle_minutes: DEFAULT_RUN_IDLE_MINUTES,
            failure_window_hours: DEFAULT_FAILURE_WINDOW_HOURS,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_MB * 1024 * 1024,
            log_dir: None,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn settings_path(&self) -> PathBuf {
        settings_path(&self.data_dir)
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}
