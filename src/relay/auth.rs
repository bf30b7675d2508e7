//! Bearer-token authentication middleware.
//!
//! Shared by the relay agent and the `/reprocess` binding. Token
//! comparison is constant-time.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::error::AgentError;

/// Expected token; `None` disables the check
#[derive(Debug, Clone, Default)]
pub struct BearerToken(Option<Arc<str>>);

impl BearerToken {
    pub fn new(token: Option<&str>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    /// Check an `Authorization` header value against the expected token
    pub fn accepts(&self, header: Option<&str>) -> bool {
        let Some(expected) = self.0.as_deref() else {
            return true;
        };

        header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map_or(false, |presented| constant_time_eq(presented, expected))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        // Keep timing independent of where the lengths diverge
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

pub async fn require_bearer(
    State(token): State<BearerToken>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AgentError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !token.accepts(header) {
        warn!(
            target: "security",
            path = %request.uri().path(),
            "Rejected request with missing or invalid token"
        );
        return Err(AgentError::Unauthorized);
    }

    Ok(next.run(request).await)
}
