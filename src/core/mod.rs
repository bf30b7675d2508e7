//! Core orchestration logic.
//!
//! This module contains:
//! - Error: step failures and their outcome mapping
//! - Pipeline: run state machine and report
//! - Safety: path containment and output bounds
//! - Backup: timestamped sibling copies
//! - Orchestrator: main execution engine

pub mod backup;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod safety;

// Re-export commonly used types
pub use error::StepError;
pub use orchestrator::{Orchestrator, ReprocessRequest};
pub use pipeline::{PipelineRun, Reportable, ReprocessReport, Stage};
pub use safety::{check_filename, resolve_within};
