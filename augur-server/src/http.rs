//! Augur HTTP REST API
//!
//! Axum-based HTTP server exposing per-response predictions and the small
//! amount of form/response access the prediction view needs.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, Value)`. The inner functions are
//! directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                      — store health
//! - GET  /version                     — server and feature schema versions
//! - GET  /forms/:form_id              — one form
//! - GET  /forms/:form_id/responses    — responses in storage order
//! - GET  /forms/:form_id/predictions  — one prediction per response
//! - POST /responses                   — submit a response

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use augur_core::{AugurError, FeatureSchema, FormStore, Predictor, Response};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::subsystems::predict::{self, BatchOptions};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn FormStore>,
    pub predictor: Arc<dyn Predictor>,
    pub schema: Arc<FeatureSchema>,
    pub options: BatchOptions,
    /// Cancelled on server shutdown; every batch runs under a child token.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/forms/:form_id", get(form_handler))
        .route("/forms/:form_id/responses", get(responses_handler))
        .route("/forms/:form_id/predictions", get(predictions_handler))
        .route("/responses", post(submit_response_handler))
        .with_state(state)
}

/// Start the HTTP server on `addr`.
/// Gracefully shuts down when the state's shutdown token is cancelled.
pub async fn start_http_server(addr: &str, state: Arc<HttpState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Augur HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    pub form_id: Uuid,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub response: Vec<augur_core::Answer>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn body(msg: impl Into<String>) -> serde_json::Value {
        serde_json::to_value(Self::new(msg)).unwrap_or_default()
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — asks the store for a status line.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.store.health().await {
        Ok(detail) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": state.store.name(),
                "detail": detail,
                "predictor": state.predictor.name(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner(schema: &FeatureSchema) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "feature_schema": schema.version,
        "features": schema.field_names().collect::<Vec<_>>(),
    })
}

/// Inner form lookup.
pub async fn form_inner(state: &HttpState, form_id: &str) -> (StatusCode, serde_json::Value) {
    let form_id = match parse_form_id(form_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.store.find_form_by_id(form_id).await {
        Ok(Some(form)) => (
            StatusCode::OK,
            serde_json::to_value(form).unwrap_or_default(),
        ),
        Ok(None) => error_response(&AugurError::NotFound(form_id)),
        Err(e) => error_response(&e),
    }
}

/// Inner response listing — responses of one form, storage order.
pub async fn responses_inner(state: &HttpState, form_id: &str) -> (StatusCode, serde_json::Value) {
    let form_id = match parse_form_id(form_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.store.find_responses_by_form_id(form_id).await {
        Ok(responses) => (
            StatusCode::OK,
            serde_json::to_value(responses).unwrap_or_default(),
        ),
        Err(e) => error_response(&e),
    }
}

/// Inner predictions — runs the prediction batch for one form.
///
/// Returns the bare result array; counts and timing go to the log.
pub async fn predictions_inner(
    state: &HttpState,
    form_id: &str,
) -> (StatusCode, serde_json::Value) {
    let form_id = match parse_form_id(form_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let start = Instant::now();
    let cancel = state.shutdown.child_token();

    let result = predict::get_predictions(
        form_id,
        state.store.as_ref(),
        state.predictor.as_ref(),
        &state.schema,
        &state.options,
        &cancel,
    )
    .await;

    match result {
        Ok(report) => {
            tracing::info!(
                form_id = %form_id,
                schema = %report.schema_version,
                total = report.total,
                failed = report.failed,
                took_ms = start.elapsed().as_millis() as u64,
                "Predictions served"
            );
            (
                StatusCode::OK,
                serde_json::to_value(report.results).unwrap_or_default(),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// Inner submit — stores a response for an existing form.
pub async fn submit_response_inner(
    state: &HttpState,
    req: SubmitResponseRequest,
) -> (StatusCode, serde_json::Value) {
    match state.store.find_form_by_id(req.form_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(&AugurError::NotFound(req.form_id)),
        Err(e) => return error_response(&e),
    }

    let response = Response::new(req.form_id, req.user_id, req.response);
    match state.store.insert_response(&response).await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::to_value(response).unwrap_or_default(),
        ),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner(&state.schema)))
}

pub async fn form_handler(
    State(state): State<Arc<HttpState>>,
    Path(form_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = form_inner(&state, &form_id).await;
    (status, Json(body))
}

pub async fn responses_handler(
    State(state): State<Arc<HttpState>>,
    Path(form_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = responses_inner(&state, &form_id).await;
    (status, Json(body))
}

pub async fn predictions_handler(
    State(state): State<Arc<HttpState>>,
    Path(form_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = predictions_inner(&state, &form_id).await;
    (status, Json(body))
}

pub async fn submit_response_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SubmitResponseRequest>,
) -> impl IntoResponse {
    let (status, body) = submit_response_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_form_id(raw: &str) -> std::result::Result<Uuid, (StatusCode, serde_json::Value)> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            ErrorResponse::body(format!("invalid form id '{}'", raw)),
        )
    })
}

/// Map a core error onto an HTTP status and error body.
pub fn error_response(e: &AugurError) -> (StatusCode, serde_json::Value) {
    match e {
        AugurError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorResponse::body("Form not found")),
        AugurError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::body(msg.clone())),
        AugurError::StoreUnavailable(_) | AugurError::Cancelled => {
            tracing::error!(error = %e, "Request failed");
            (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::body(e.to_string()))
        }
        AugurError::Database(_) => {
            tracing::error!(error = %e, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::body(e.to_string()))
        }
    }
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
