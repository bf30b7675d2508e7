//! docpipe - Cross-system document reprocessing pipeline
//!
//! Validates a document code, finds `<CODE>.xml` in prioritized search
//! roots, stages it into an import folder, runs an external transform,
//! backs up the CSV it produced and submits an import template to the ERP
//! over SOAP.
//!
//! # Architecture
//!
//! Each run is a short-lived state machine:
//! - Every attempted step yields exactly one recorded outcome
//! - The first `error` ends the run; `warning` never blocks
//! - The report returned to the caller is the only record of a run
//!
//! Document access sits behind a `DocumentStore` with a local-filesystem
//! and a relay-agent implementation.
//!
//! # Modules
//!
//! - `adapters`: External systems (filesystem, relay, transform, ERP)
//! - `core`: Orchestration logic (run state, errors, path safety, backups)
//! - `domain`: Data structures (Identifier, StepOutcome, documents)
//! - `relay`: The relay agent HTTP service
//! - `server`: HTTP binding for the pipeline
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Reprocess one document
//! docpipe reprocess Q1234567
//!
//! # Serve POST /reprocess
//! docpipe serve --bind 127.0.0.1:8000
//!
//! # Run the relay agent on the document host
//! docpipe relay --bind 0.0.0.0:5000
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod relay;
pub mod server;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use core::{Orchestrator, ReprocessReport, ReprocessRequest, StepError};
pub use domain::{FailureKind, Identifier, StepKind, StepOutcome, StepStatus};
