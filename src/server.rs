use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{actions, health, ingest, queries};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Inline screenshots are hex encoded, so a step body may be twice the
    // attachment limit plus the JSON around it.
    let body_limit = state.config.max_attachment_bytes * 2 + 64 * 1024;

    Router::new()
        // Health
        .route("/health", get(health::health))
        // Ingestion
        .route("/steps", post(ingest::submit_step))
        .route("/reports", post(ingest::submit_report))
        .route(
            "/runs/{run_id}/steps/{step_number}/screenshot",
            get(ingest::download_screenshot).put(ingest::upload_screenshot),
        )
        // Queries
        .route("/failures", get(queries::list_failures))
        .route("/runs", get(queries::list_runs))
        .route("/runs/{run_id}", get(queries::get_run))
        .route(
            "/runs/{run_id}/reports/{report_id}",
            get(queries::get_report),
        )
        .route("/reports/pending", get(queries::pending_reports))
        .route("/summary", get(queries::summary))
        // Lifecycle actions
        .route(
            "/failures/{run_id}/{step_number}/acknowledge",
            post(actions::acknowledge_failure),
        )
        .route(
            "/reports/{run_id}/{report_id}/action",
            post(actions::mark_report_actioned),
        )
        .route("/index/rebuild", post(actions::rebuild_index))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
