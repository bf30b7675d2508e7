//! Step failures and their conversion into outcomes.

use thiserror::Error;

use crate::domain::{FailureKind, StepDetail, StepKind, StepOutcome};

/// Errors a pipeline step can produce.
///
/// Steps return these; the orchestrator folds them into a `StepOutcome`
/// via [`StepError::into_outcome`]. Nothing escapes past the run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Invalid code \"{raw}\": expected Q or R followed by exactly 7 digits")]
    InvalidIdentifier { raw: String },

    #[error("{filename} was not found in any configured folder")]
    NotFound {
        filename: String,
        searched_paths: Vec<String>,
    },

    #[error("Access denied: \"{requested}\" resolves outside {root}")]
    PathTraversal { requested: String, root: String },

    #[error("Invalid filename \"{0}\"")]
    InvalidFilename(String),

    #[error("{target} is unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("{target} did not answer within {seconds}s")]
    NetworkTimeout { target: String, seconds: u64 },

    #[error("Relay rejected the access token")]
    RelayUnauthorized,

    #[error("Relay responded with HTTP {status}")]
    RelayStatus { status: u16, body: String },

    #[error("Unexpected response from {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Transform command not found: \"{command}\"")]
    TransformNotFound { command: String },

    #[error("Transform failed with exit code {}", describe_exit(.exit_code))]
    TransformFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        elapsed_ms: u64,
    },

    #[error("Transform exceeded its time limit ({seconds}s)")]
    TransformTimeout { seconds: u64, elapsed_ms: u64 },

    #[error("ERP returned a SOAP fault")]
    SoapFault { excerpt: String },

    #[error("ERP responded with HTTP {status}")]
    ErpStatus { status: u16, body: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Taxonomy bucket of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::InvalidIdentifier { .. } => FailureKind::Validation,
            StepError::NotFound { .. } => FailureKind::NotFound,
            StepError::PathTraversal { .. } | StepError::InvalidFilename(_) => FailureKind::Security,
            StepError::Unreachable { .. } | StepError::NetworkTimeout { .. } => {
                FailureKind::TransientNetwork
            }
            StepError::RelayUnauthorized | StepError::NotConfigured(_) => {
                FailureKind::Configuration
            }
            StepError::RelayStatus { .. }
            | StepError::Protocol { .. }
            | StepError::SoapFault { .. }
            | StepError::ErpStatus { .. } => FailureKind::RemoteFault,
            StepError::TransformNotFound { .. }
            | StepError::TransformFailed { .. }
            | StepError::TransformTimeout { .. } => FailureKind::ExternalProcess,
            StepError::Io { .. } => FailureKind::Io,
        }
    }

    /// Whether re-invoking the whole pipeline may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::TransientNetwork
    }

    fn detail(&self) -> Option<StepDetail> {
        match self {
            StepError::NotFound {
                filename,
                searched_paths,
            } => Some(StepDetail::NotFound {
                filename: filename.clone(),
                searched_paths: searched_paths.clone(),
            }),
            StepError::PathTraversal { requested, .. } => Some(StepDetail::TraversalBlocked {
                requested: requested.clone(),
            }),
            StepError::Unreachable { target, .. } | StepError::NetworkTimeout { target, .. } => {
                Some(StepDetail::Network {
                    target: target.clone(),
                })
            }
            StepError::TransformFailed {
                exit_code,
                stdout,
                stderr,
                elapsed_ms,
            } => Some(StepDetail::Transform {
                exit_code: *exit_code,
                stdout: non_empty(stdout),
                stderr: non_empty(stderr),
                elapsed_ms: *elapsed_ms,
            }),
            StepError::TransformTimeout { elapsed_ms, .. } => Some(StepDetail::Transform {
                exit_code: None,
                stdout: None,
                stderr: None,
                elapsed_ms: *elapsed_ms,
            }),
            StepError::SoapFault { excerpt } => Some(StepDetail::SoapFault {
                excerpt: excerpt.clone(),
            }),
            StepError::ErpStatus { status, body } | StepError::RelayStatus { status, body } => {
                Some(StepDetail::HttpStatus {
                    status: *status,
                    body: body.clone(),
                })
            }
            _ => None,
        }
    }

    /// Convert into the terminal outcome for `step`
    pub fn into_outcome(self, step: StepKind) -> StepOutcome {
        let outcome = StepOutcome::error(step, self.kind(), self.to_string());
        match self.detail() {
            Some(detail) => outcome.with_detail(detail),
            None => outcome,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepStatus;

    #[test]
    fn test_traversal_is_security_not_not_found() {
        let err = StepError::PathTraversal {
            requested: "../../etc/passwd".to_string(),
            root: "/data".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Security);

        let outcome = err.into_outcome(StepKind::Locate);
        assert_eq!(outcome.status, StepStatus::Error);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Security));
    }

    #[test]
    fn test_network_failures_are_distinguishable() {
        let unreachable = StepError::Unreachable {
            target: "ERP".to_string(),
            reason: "connection refused".to_string(),
        };
        let timeout = StepError::NetworkTimeout {
            target: "ERP".to_string(),
            seconds: 60,
        };
        let rejected = StepError::ErpStatus {
            status: 500,
            body: "boom".to_string(),
        };

        assert!(unreachable.is_transient());
        assert!(timeout.is_transient());
        assert!(!rejected.is_transient());
        assert_ne!(unreachable.to_string(), timeout.to_string());
        assert_eq!(rejected.kind(), FailureKind::RemoteFault);
    }

    #[test]
    fn test_transform_failure_carries_output() {
        let outcome = StepError::TransformFailed {
            exit_code: Some(3),
            stdout: String::new(),
            stderr: "bad input".to_string(),
            elapsed_ms: 12,
        }
        .into_outcome(StepKind::Transform);

        assert!(outcome.message.contains("exit code 3"));
        assert_eq!(
            outcome.detail,
            Some(StepDetail::Transform {
                exit_code: Some(3),
                stdout: None,
                stderr: Some("bad input".to_string()),
                elapsed_ms: 12,
            })
        );
    }
}
