use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::parse_step_number;
use crate::error::FeedbackError;
use crate::model::{FailureState, MutationOutcome, ReportState, RunKey, Summary};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action_taken: String,
}

pub async fn acknowledge_failure(
    State(state): State<SharedState>,
    Path((run_id, step)): Path<(String, String)>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<MutationOutcome<FailureState>>, FeedbackError> {
    let Json(body) = body?;
    let key = RunKey::parse(&run_id)?;
    let step_number = parse_step_number(&step)?;
    let outcome = state
        .store
        .mutate_failure_state(&key, step_number, &body.action_taken)?;
    Ok(Json(outcome))
}

pub async fn mark_report_actioned(
    State(state): State<SharedState>,
    Path((run_id, report_id)): Path<(String, String)>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<MutationOutcome<ReportState>>, FeedbackError> {
    let Json(body) = body?;
    let key = RunKey::parse(&run_id)?;
    let outcome = state
        .store
        .mutate_report_state(&key, &report_id, &body.action_taken)?;
    Ok(Json(outcome))
}

pub async fn rebuild_index(State(state): State<SharedState>) -> Result<Json<Summary>, FeedbackError> {
    Ok(Json(state.store.rebuild_indices()?))
}
