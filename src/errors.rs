use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AggregationError>;

/// Every way a recompute request can fail.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Forbidden: role {0} may not recalculate averages")]
    Forbidden(String),

    #[error("Forbidden: profile lookup failed: {0}")]
    ProfileLookup(String),

    #[error("Forbidden: classroom {classroom_id} is outside the caller's school")]
    ClassroomOutOfScope { classroom_id: Uuid },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Either classroom_id or school_id is required")]
    MissingFilter,

    #[error("Failed to read progress records: {0}")]
    Read(String),

    #[error("Analytics store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Failed to write class averages: {0}")]
    Write(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AggregationError {
    pub fn code(&self) -> &'static str {
        match self {
            AggregationError::Unauthenticated => "unauthenticated",
            AggregationError::Forbidden(_) => "forbidden",
            AggregationError::ProfileLookup(_) => "profile_lookup_error",
            AggregationError::ClassroomOutOfScope { .. } => "classroom_out_of_scope",
            AggregationError::InvalidRequest(_) => "invalid_request",
            AggregationError::MissingFilter => "missing_filter",
            AggregationError::Read(_) => "read_error",
            AggregationError::StoreUnavailable(_) => "store_unavailable",
            AggregationError::Write(_) => "write_error",
            AggregationError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AggregationError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AggregationError::Forbidden(_)
            | AggregationError::ProfileLookup(_)
            | AggregationError::ClassroomOutOfScope { .. } => StatusCode::FORBIDDEN,
            AggregationError::InvalidRequest(_)
            | AggregationError::MissingFilter
            | AggregationError::Read(_)
            | AggregationError::StoreUnavailable(_)
            | AggregationError::Write(_) => StatusCode::BAD_REQUEST,
            AggregationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AggregationError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AggregationError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                "Internal server error".to_string()
            }
            other => {
                tracing::warn!(code = other.code(), error = %other, "recompute request failed");
                other.to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Failure reported by an analytics store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Write(String),
}

impl From<StoreError> for AggregationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AggregationError::StoreUnavailable(msg),
            StoreError::Write(msg) => AggregationError::Write(msg),
        }
    }
}
