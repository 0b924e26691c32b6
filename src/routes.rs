use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth;
use crate::errors::{AggregationError, Result};
use crate::models::{RecomputeRequest, RecomputeResponse};
use crate::service::Recomputer;

#[derive(Clone)]
pub struct AppState {
    pub recomputer: Arc<Recomputer>,
    pub jwt_secret: Arc<str>,
    pub pool: Option<PgPool>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/calculate-averages", post(calculate_averages))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Open origin with a fixed header list; the trigger is an internal tool.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

async fn calculate_averages(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<RecomputeRequest>, JsonRejection>,
) -> Result<Json<RecomputeResponse>> {
    let principal = auth::principal_from_headers(&headers, &state.jwt_secret);
    if principal.is_none() {
        return Err(AggregationError::Unauthenticated);
    }

    let Json(request) = payload.map_err(|rejection| AggregationError::InvalidRequest(rejection.body_text()))?;
    let outcome = state.recomputer.recompute_for(principal, request).await?;
    Ok(Json(outcome.into()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let Some(pool) = state.pool.as_ref() else {
        return (StatusCode::OK, Json(json!({ "status": "ok" })));
    };

    match crate::db::health_check(pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
