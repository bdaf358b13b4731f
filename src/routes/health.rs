use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub data_dir: String,
    pub runs: Option<usize>,
    pub started_at: String,
}

/// Liveness check. Never fails; an unreadable store shows up as `degraded`.
pub fn health_snapshot(state: &SharedState) -> HealthResponse {
    let runs = match state.store.run_count() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("Health check could not list runs: {}", e);
            None
        }
    };
    HealthResponse {
        status: determine_status(runs.is_some()).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir: state.config.data_dir.display().to_string(),
        runs,
        started_at: state.started_at.to_rfc3339(),
    }
}

pub fn determine_status(store_readable: bool) -> &'static str {
    if store_readable {
        "ok"
    } else {
        "degraded"
    }
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(health_snapshot(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values() {
        assert_eq!(determine_status(true), "ok");
        assert_eq!(determine_status(false), "degraded");
    }

    #[test]
    fn test_health_response_serializes_to_json() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            data_dir: "/tmp/feedback".to_string(),
            runs: Some(3),
            started_at: "2026-10-19T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_string(&response).expect("should serialize");
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"runs\":3"));
    }
}
