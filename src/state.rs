use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::FeedbackConfig;
use crate::error::Result;
use crate::store::FeedbackStore;

pub type SharedState = Arc<FeedbackState>;

/// Everything a front-end needs: configuration plus the one store both
/// interfaces go through.
pub struct FeedbackState {
    pub config: FeedbackConfig,
    pub store: FeedbackStore,
    pub started_at: DateTime<Utc>,
}

impl FeedbackState {
    pub fn open(config: FeedbackConfig) -> Result<Self> {
        let store = FeedbackStore::open(&config)?;
        Ok(Self {
            config,
            store,
            started_at: Utc::now(),
        })
    }

    pub fn shared(config: FeedbackConfig) -> Result<SharedState> {
        Ok(Arc::new(Self::open(config)?))
    }
}
