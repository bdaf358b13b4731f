use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

impl FeedbackError {
    /// Stable tag for the `kind` field of error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedbackError::Validation(_) => "validation",
            FeedbackError::NotFound(_) => "not_found",
            FeedbackError::Io(_) => "io",
            FeedbackError::Serialization(_) => "serialization",
            FeedbackError::Other(_) => "internal",
        }
    }

    /// Caller errors are reported back; everything else is a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FeedbackError::Validation(_) | FeedbackError::NotFound(_)
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        })
    }
}

impl From<tempfile::PersistError> for FeedbackError {
    fn from(err: tempfile::PersistError) -> Self {
        FeedbackError::Io(err.error)
    }
}

impl From<axum::extract::rejection::JsonRejection> for FeedbackError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        FeedbackError::Validation(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for FeedbackError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        FeedbackError::Validation(rejection.body_text())
    }
}

impl From<axum::extract::rejection::BytesRejection> for FeedbackError {
    fn from(rejection: axum::extract::rejection::BytesRejection) -> Self {
        FeedbackError::Validation(rejection.body_text())
    }
}

impl IntoResponse for FeedbackError {
    fn into_response(self) -> Response {
        let status = match &self {
            FeedbackError::Validation(_) => StatusCode::BAD_REQUEST,
            FeedbackError::NotFound(_) => StatusCode::NOT_FOUND,
            FeedbackError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FeedbackError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FeedbackError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, axum::Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(FeedbackError::Validation("x".into()).kind(), "validation");
        assert_eq!(FeedbackError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(FeedbackError::Other("x".into()).kind(), "internal");
    }

    #[test]
    fn test_status_codes() {
        let resp = FeedbackError::Validation("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = FeedbackError::NotFound("run".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let resp = FeedbackError::from(io).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_json_payload_shape() {
        let json = FeedbackError::NotFound("run abc".into()).to_json();
        assert_eq!(json["kind"], "not_found");
        assert!(json["error"].as_str().unwrap().contains("run abc"));
    }
}
