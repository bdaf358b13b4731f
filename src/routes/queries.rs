use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;

use crate::config::DEFAULT_RUN_LIST_LIMIT;
use crate::error::FeedbackError;
use crate::model::{FailureEntry, PendingReportEntry, ReportRecord, RunKey, RunMeta, RunRecord, Summary};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct FailureQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
    pub journey_id: Option<String>,
}

/// Resolve the failure window, falling back to the configured default.
pub fn failure_window(hours: Option<i64>, default_hours: i64) -> Result<Duration, FeedbackError> {
    let hours = hours.unwrap_or(default_hours);
    if hours <= 0 {
        return Err(FeedbackError::Validation(format!(
            "hours must be positive, got {}",
            hours
        )));
    }
    Ok(Duration::hours(hours))
}

pub async fn list_failures(
    State(state): State<SharedState>,
    query: Result<Query<FailureQuery>, QueryRejection>,
) -> Result<Json<Vec<FailureEntry>>, FeedbackError> {
    let Query(query) = query?;
    let window = failure_window(query.hours, state.config.failure_window_hours)?;
    Ok(Json(state.store.list_recent_failures(window)?))
}

pub async fn list_runs(
    State(state): State<SharedState>,
    query: Result<Query<RunsQuery>, QueryRejection>,
) -> Result<Json<Vec<RunMeta>>, FeedbackError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIST_LIMIT);
    Ok(Json(
        state.store.list_runs(limit, query.journey_id.as_deref())?,
    ))
}

pub async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, FeedbackError> {
    let key = RunKey::parse(&run_id)?;
    Ok(Json(state.store.get_run(&key)?))
}

pub async fn get_report(
    State(state): State<SharedState>,
    Path((run_id, report_id)): Path<(String, String)>,
) -> Result<Json<ReportRecord>, FeedbackError> {
    let key = RunKey::parse(&run_id)?;
    Ok(Json(state.store.get_report(&key, &report_id)?))
}

pub async fn pending_reports(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PendingReportEntry>>, FeedbackError> {
    Ok(Json(state.store.list_pending_reports()?))
}

pub async fn summary(State(state): State<SharedState>) -> Result<Json<Summary>, FeedbackError> {
    Ok(Json(state.store.summary()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_window_defaults() {
        assert_eq!(failure_window(None, 24).unwrap(), Duration::hours(24));
        assert_eq!(failure_window(Some(2), 24).unwrap(), Duration::hours(2));
    }

    #[test]
    fn test_failure_window_rejects_non_positive() {
        assert!(failure_window(Some(0), 24).is_err());
        assert!(failure_window(Some(-5), 24).is_err());
    }
}
