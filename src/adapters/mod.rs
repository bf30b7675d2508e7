//! Adapters for the external systems a run touches.
//!
//! Document access goes through the [`DocumentStore`] trait, with one
//! implementation per deployment topology:
//! - `LocalFilesystemStore`: search roots and import folder on this host
//! - `RelayHttpStore`: the same capabilities delegated to a relay agent
//!
//! The transform executor and the ERP submitter are concrete adapters.

pub mod erp;
pub mod local;
pub mod relay;
pub mod transform;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::StepError;
use crate::domain::{Identifier, LocatedDocument, OutputBackup, StagedDocument, StagingRequest};

// Re-export the adapters
pub use erp::{ErpSubmitter, SubmitRequest, Submission};
pub use local::LocalFilesystemStore;
pub use relay::RelayHttpStore;
pub use transform::{TransformCommand, TransformExecutor, TransformResult};

/// Locate/stage capability shared by both topologies
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Search the candidate roots in priority order; first match wins
    async fn locate(&self, identifier: &Identifier) -> Result<LocatedDocument, StepError>;

    /// Write a located document into the import location
    async fn stage(&self, request: StagingRequest<'_>) -> Result<StagedDocument, StepError>;

    /// Back up the newest output left by the transform.
    ///
    /// `Skipped` means this store keeps no output backups and the step is
    /// not recorded.
    async fn backup_output(&self) -> Result<OutputBackup, StepError> {
        Ok(OutputBackup::Skipped)
    }

    /// Check that the store is usable before a run
    async fn health_check(&self) -> Result<()>;
}
