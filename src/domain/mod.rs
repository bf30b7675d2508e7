//! Domain types for the reprocessing pipeline.
//!
//! This module contains the core data structures:
//! - Identifier: Validated production codes
//! - Outcome: Per-step results and their detail payloads
//! - Document: Located and staged documents flowing between steps

pub mod document;
pub mod identifier;
pub mod outcome;

// Re-export commonly used types
pub use document::{
    content_digest, DocumentSource, LocatedDocument, OutputBackup, StagedDocument, StagingRequest,
};
pub use identifier::{validate, Identifier};
pub use outcome::{FailureKind, RecordedStep, StepDetail, StepKind, StepOutcome, StepStatus};
