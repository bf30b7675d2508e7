//! HTTP binding for the pipeline.
//!
//! `POST /reprocess` with `{"code": "..."}` answers 200 when every step
//! passed, 422 with the full report otherwise, and 400 when no code was
//! given.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::{Orchestrator, ReprocessRequest};
use crate::relay::{auth, shutdown_signal, BearerToken};

/// Body of a 400 response
#[derive(Debug, Serialize)]
pub struct DetailBody {
    pub detail: String,
}

fn bad_request(detail: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(DetailBody {
            detail: detail.into(),
        }),
    )
        .into_response()
}

pub async fn reprocess(
    State(orchestrator): State<Arc<Orchestrator>>,
    payload: Result<Json<ReprocessRequest>, JsonRejection>,
) -> Response {
    let mut request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    request.code = request.code.trim().to_string();
    if request.code.is_empty() {
        return bad_request("Field \"code\" is required");
    }

    let report = orchestrator.reprocess_request(&request).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    (status, Json(report)).into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Router for the pipeline binding; `token` guards `/reprocess` when enabled
pub fn router(orchestrator: Arc<Orchestrator>, token: BearerToken) -> Router {
    let protected = Router::new()
        .route("/reprocess", post(reprocess))
        .layer(middleware::from_fn_with_state(token, auth::require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve the pipeline binding on `addr`
pub async fn serve(orchestrator: Arc<Orchestrator>, token: BearerToken, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, auth = token.is_enabled(), "Pipeline server listening");

    axum::serve(listener, router(orchestrator, token))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Pipeline server failed")?;

    Ok(())
}
