use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;

use super::parse_step_number;
use crate::error::FeedbackError;
use crate::model::{
    AttachmentMeta, ReportSubmission, RunKey, StepSubmission, SubmitReportResponse,
    SubmitStepResponse,
};
use crate::state::SharedState;

pub async fn submit_step(
    State(state): State<SharedState>,
    body: Result<Json<StepSubmission>, JsonRejection>,
) -> Result<Json<SubmitStepResponse>, FeedbackError> {
    let Json(submission) = body?;
    let response = state.store.submit_step(submission)?;
    Ok(Json(response))
}

pub async fn submit_report(
    State(state): State<SharedState>,
    body: Result<Json<ReportSubmission>, JsonRejection>,
) -> Result<Json<SubmitReportResponse>, FeedbackError> {
    let Json(submission) = body?;
    let response = state.store.submit_report(submission)?;
    Ok(Json(response))
}

pub async fn upload_screenshot(
    State(state): State<SharedState>,
    Path((run_id, step)): Path<(String, String)>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<AttachmentMeta>, FeedbackError> {
    let body = body?;
    let key = RunKey::parse(&run_id)?;
    let step_number = parse_step_number(&step)?;
    if body.is_empty() {
        return Err(FeedbackError::Validation(
            "screenshot body is empty".to_string(),
        ));
    }
    let meta = state.store.attach_screenshot(&key, step_number, &body)?;
    Ok(Json(meta))
}

pub async fn download_screenshot(
    State(state): State<SharedState>,
    Path((run_id, step)): Path<(String, String)>,
) -> Result<impl IntoResponse, FeedbackError> {
    let key = RunKey::parse(&run_id)?;
    let step_number = parse_step_number(&step)?;
    let bytes = state.store.read_screenshot(&key, step_number)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
