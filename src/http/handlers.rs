//! Axum HTTP handlers for the web server

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{errors::AppError, metrics, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LandingResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub metrics_endpoint: String,
    pub items: usize,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn landing(State(state): State<AppState>) -> Json<LandingResponse> {
    Json(LandingResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        metrics_endpoint: state.metrics_path.to_string(),
        items: state.engine.items().len(),
    })
}

/// Runs one probe cycle and renders it in Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let report = state
        .engine
        .run_cycle()
        .await
        .map_err(|err| AppError::internal(format!("probe task failed: {err}")))?;

    Ok((
        [(header::CONTENT_TYPE, metrics::CONTENT_TYPE)],
        metrics::render(&report),
    )
        .into_response())
}
