use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::config::{
    DEFAULT_FAILURE_WINDOW_HOURS, DEFAULT_MAX_ATTACHMENT_MB, DEFAULT_RUN_IDLE_MINUTES,
};
use crate::store::atomic::write_atomic;

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistentSettings {
    pub run_idle_minutes: Option<i64>,
    pub failure_window_hours: Option<i64>,
    pub max_attachment_mb: Option<usize>,
}

impl PersistentSettings {
    pub fn with_defaults() -> Self {
        Self {
            run_idle_minutes: Some(DEFAULT_RUN_IDLE_MINUTES),
            failure_window_hours: Some(DEFAULT_FAILURE_WINDOW_HOURS),
            max_attachment_mb: Some(DEFAULT_MAX_ATTACHMENT_MB),
        }
    }
}

pub fn load_settings(path: &Path) -> PersistentSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring malformed settings file {:?}: {}", path, e);
            PersistentSettings::default()
        }),
        Err(_) => PersistentSettings::default(),
    }
}

pub fn save_settings(path: &Path, settings: &PersistentSettings) {
    match serde_json::to_vec_pretty(settings) {
        Ok(json) => {
            if let Err(e) = write_atomic(path, &json) {
                warn!("Failed to save settings to {:?}: {}", path, e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize settings: {}", e);
        }
    }
}

/// Load the settings file, seeding it with the defaults when absent.
pub fn load_or_init(path: &Path) -> PersistentSettings {
    if !path.exists() {
        save_settings(path, &PersistentSettings::with_defaults());
    }
    load_settings(path)
}
