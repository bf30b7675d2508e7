//! Relay agent endpoint handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Local;
use tracing::{error, info, warn};

use super::error::AgentError;
use super::protocol::{
    ExecuteSqlRequest, FetchXmlNotFound, FetchXmlResponse, HealthResponse, SqlResponse,
    WriteCsvRequest, WriteCsvResponse, WriteXmlRequest, WriteXmlResponse,
};
use super::sql::SqlError;
use super::AgentState;
use crate::core::backup::write_with_backup;
use crate::core::safety::{check_filename, resolve_within};
use crate::core::StepError;

pub const SERVICE_NAME: &str = "docpipe-relay";

fn hostname() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AgentError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AgentError::BadRequest(rejection.body_text()))
}

/// `GET /health` (no auth)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Local::now().to_rfc3339(),
        hostname: hostname(),
    })
}

/// `GET /fetch-xml/{code}`
pub async fn fetch_xml(
    State(state): State<AgentState>,
    Path(code): Path<String>,
) -> Result<Response, AgentError> {
    if code.contains("..") || code.contains('/') || code.contains('\\') {
        warn!(target: "security", %code, "Path traversal attempt blocked");
        return Err(AgentError::Forbidden("Access denied".to_string()));
    }

    let sanitized: String = code.chars().filter(|c| *c != '-' && *c != '_').collect();
    if sanitized.is_empty() || !sanitized.chars().all(char::is_alphanumeric) {
        return Err(AgentError::BadRequest(format!("Invalid code: \"{}\"", code)));
    }

    let stem = code.to_uppercase();
    info!(filename = %format!("{}.xml", stem), "Searching for document");

    match state.store.find(&stem).await {
        Ok((path_number, path)) => {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                error!(path = %path.display(), error = %e, "Failed to read document");
                AgentError::Internal(format!("Failed to read file: {}", e))
            })?;

            info!(path_number, path = %path.display(), "Document found");
            Ok(Json(FetchXmlResponse {
                found: true,
                path_number,
                path: path.display().to_string(),
                filename: format!("{}.xml", stem),
                size_bytes: content.len() as u64,
                content,
            })
            .into_response())
        }
        Err(StepError::NotFound {
            filename,
            searched_paths,
        }) => {
            info!(%filename, "Document not found");
            Ok((
                StatusCode::NOT_FOUND,
                Json(FetchXmlNotFound {
                    found: false,
                    filename,
                    searched_paths,
                }),
            )
                .into_response())
        }
        Err(e @ StepError::PathTraversal { .. }) => Err(AgentError::Forbidden(e.to_string())),
        Err(e) => Err(AgentError::Internal(e.to_string())),
    }
}

/// `POST /write-csv`
pub async fn write_csv(
    State(state): State<AgentState>,
    payload: Result<Json<WriteCsvRequest>, JsonRejection>,
) -> Result<Json<WriteCsvResponse>, AgentError> {
    let request = json_body(payload)?;
    let path = state
        .config
        .csv_import_path
        .as_deref()
        .ok_or_else(|| AgentError::Internal("CSV import path is not configured".to_string()))?;

    info!(chars = request.csv_content.len(), path = %path.display(), "Writing CSV");

    let receipt = write_with_backup(path, request.csv_content.as_bytes())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to write CSV");
            AgentError::Internal(format!("Failed to write CSV: {}", e))
        })?;

    info!(backup = %receipt.backup.display(), "CSV written");
    Ok(Json(WriteCsvResponse {
        success: true,
        path: receipt.path.display().to_string(),
        backup: receipt.backup.display().to_string(),
        size_bytes: receipt.size_bytes,
    }))
}

/// `POST /write-xml`
pub async fn write_xml(
    State(state): State<AgentState>,
    payload: Result<Json<WriteXmlRequest>, JsonRejection>,
) -> Result<Json<WriteXmlResponse>, AgentError> {
    let request = json_body(payload)?;

    // Reject before touching the filesystem
    check_filename(&request.filename).map_err(|e| {
        warn!(target: "security", filename = %request.filename, "Rejected filename");
        AgentError::BadRequest(e.to_string())
    })?;

    let import_dir = state
        .config
        .xml_import_dir
        .as_deref()
        .ok_or_else(|| AgentError::Internal("XML import directory is not configured".to_string()))?;

    tokio::fs::create_dir_all(import_dir)
        .await
        .map_err(|e| AgentError::Internal(format!("Failed to create import directory: {}", e)))?;

    let destination = resolve_within(import_dir, &request.filename)
        .map_err(|e| AgentError::BadRequest(e.to_string()))?;

    info!(filename = %request.filename, dir = %import_dir.display(), "Writing XML");

    let receipt = write_with_backup(&destination, request.content.as_bytes())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to write XML");
            AgentError::Internal(format!("Failed to write XML: {}", e))
        })?;

    Ok(Json(WriteXmlResponse {
        success: true,
        path: receipt.path.display().to_string(),
        size_bytes: receipt.size_bytes,
        backup: Some(receipt.backup.display().to_string()),
    }))
}

/// `POST /execute-sql`
pub async fn execute_sql(
    State(state): State<AgentState>,
    payload: Result<Json<ExecuteSqlRequest>, JsonRejection>,
) -> Result<Json<SqlResponse>, AgentError> {
    let request = json_body(payload)?;
    let gateway = state
        .sql
        .clone()
        .ok_or_else(|| AgentError::Internal("No database is configured".to_string()))?;

    let result = tokio::task::spawn_blocking(move || gateway.execute(&request))
        .await
        .map_err(|e| AgentError::Internal(format!("SQL task failed: {}", e)))?;

    result.map(Json).map_err(|e| match e {
        SqlError::Blocked(_) => AgentError::Forbidden(e.to_string()),
        SqlError::EmptyQuery | SqlError::MissingParam(_) | SqlError::UnsupportedParam(_) => {
            AgentError::BadRequest(e.to_string())
        }
        SqlError::Poisoned | SqlError::Sqlite(_) => {
            error!(error = %e, "SQL execution failed");
            AgentError::Internal(e.to_string())
        }
    })
}
