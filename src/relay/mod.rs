//! Relay agent: a small HTTP service next to the document store.
//!
//! Exposes fetch, write and SQL capabilities to a remote pipeline.
//! `/health` is public; every other route requires the shared bearer
//! token. Requests are independent; concurrent writes to one path are
//! not serialized and the last writer wins.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod sql;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::adapters::LocalFilesystemStore;
use crate::config::AgentConfig;

pub use auth::BearerToken;
pub use error::AgentError;
pub use sql::SqlGateway;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub store: Arc<LocalFilesystemStore>,
    pub sql: Option<SqlGateway>,
}

impl AgentState {
    pub fn new(config: AgentConfig, sql: Option<SqlGateway>) -> Self {
        let store = LocalFilesystemStore::new(config.search_roots.clone());
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            sql,
        }
    }
}

/// The relay agent HTTP server
pub struct RelayAgent {
    state: AgentState,
    token: BearerToken,
}

impl RelayAgent {
    pub fn new(state: AgentState, token: BearerToken) -> Self {
        Self { state, token }
    }

    /// Build from configuration, opening the SQL database if one is set.
    ///
    /// Refuses to start without a token.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let token = BearerToken::new(config.token.as_deref());
        if !token.is_enabled() {
            anyhow::bail!("agent.token (or DOCPIPE_AGENT_TOKEN) must be set to run the relay agent");
        }

        let sql = match &config.database {
            Some(path) => Some(
                SqlGateway::open(path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self::new(AgentState::new(config.clone(), sql), token))
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Build the router with all routes and middleware
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/fetch-xml/{code}", get(routes::fetch_xml))
            .route("/write-csv", post(routes::write_csv))
            .route("/write-xml", post(routes::write_xml))
            .route("/execute-sql", post(routes::execute_sql))
            .layer(middleware::from_fn_with_state(
                self.token.clone(),
                auth::require_bearer,
            ));

        Router::new()
            .route("/health", get(routes::health))
            .merge(protected)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on `addr` until the process is stopped
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!(
            %addr,
            roots = self.state.config.search_roots.len(),
            sql = self.state.sql.is_some(),
            "Relay agent listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Relay agent failed")?;

        info!("Relay agent stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
