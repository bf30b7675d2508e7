//! Per-step outcomes of a reprocessing run.
//!
//! Every step produces exactly one outcome. The detail payload is a
//! tagged union so each step kind only carries the fields it needs.

use serde::{Deserialize, Serialize};

/// The steps a run can execute, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Production code syntax check
    Validate,

    /// Search of the candidate roots
    Locate,

    /// Copy/write into the import location
    Stage,

    /// External transformation program
    Transform,

    /// Timestamped copy of the output the transform produced
    Backup,

    /// SOAP call to the ERP
    Submit,
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Validate => "validate",
            StepKind::Locate => "locate",
            StepKind::Stage => "stage",
            StepKind::Transform => "transform",
            StepKind::Backup => "backup",
            StepKind::Submit => "submit",
        }
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,

    /// Recorded but the run continues
    Warning,

    /// Terminal for the run
    Error,
}

impl StepStatus {
    /// `ok` and `warning` let the run advance
    pub fn is_passing(&self) -> bool {
        !matches!(self, StepStatus::Error)
    }
}

/// Classification of a non-ok outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad identifier syntax
    Validation,

    /// Resource absent from every candidate
    NotFound,

    /// Path traversal attempt
    Security,

    /// Connection refused or timed out (relay or ERP)
    TransientNetwork,

    /// Transform exited non-zero, timed out, or could not be found
    ExternalProcess,

    /// ERP/relay answered with a fault or unexpected status
    RemoteFault,

    /// Something the run needs is not configured or was rejected as a credential
    Configuration,

    /// Local filesystem failure
    Io,

    /// Recorded on `warning` outcomes
    NonFatal,
}

/// Step-specific diagnostic detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetail {
    Validated {
        code: String,
    },

    Located {
        /// 1-based priority of the matching root
        root_index: usize,
        /// Absolute path on the host that holds the document
        path: String,
        size_bytes: u64,
        sha256: String,
    },

    NotFound {
        filename: String,
        searched_paths: Vec<String>,
    },

    TraversalBlocked {
        requested: String,
    },

    Staged {
        destination: String,
        sha256: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup_source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        csv_path: Option<String>,
    },

    Transform {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        elapsed_ms: u64,
    },

    BackedUp {
        backup: String,
        source: String,
    },

    Submitted {
        http_status: u16,
    },

    SoapFault {
        excerpt: String,
    },

    HttpStatus {
        status: u16,
        body: String,
    },

    Network {
        target: String,
    },
}

/// The immutable record of one step's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub kind: StepKind,

    pub status: StepStatus,

    /// Human-readable message for operators
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<StepDetail>,
}

impl StepOutcome {
    fn new(kind: StepKind, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            failure_kind: None,
            detail: None,
        }
    }

    pub fn ok(kind: StepKind, message: impl Into<String>) -> Self {
        Self::new(kind, StepStatus::Ok, message)
    }

    pub fn warning(kind: StepKind, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(kind, StepStatus::Warning, message);
        outcome.failure_kind = Some(FailureKind::NonFatal);
        outcome
    }

    pub fn error(kind: StepKind, failure: FailureKind, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(kind, StepStatus::Error, message);
        outcome.failure_kind = Some(failure);
        outcome
    }

    pub fn with_detail(mut self, detail: StepDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// An outcome plus its position in the run (1..N)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    pub step: u32,

    #[serde(flatten)]
    pub outcome: StepOutcome,
}
