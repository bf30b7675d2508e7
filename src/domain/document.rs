//! Documents flowing from the locate step into the stage step.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use super::identifier::Identifier;
use super::outcome::{StepDetail, StepKind, StepOutcome};

/// Where the located document's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// On the local filesystem (direct topology)
    Path(PathBuf),

    /// Returned inline by the relay agent (the caller is remote)
    Inline(String),
}

/// A document found in one of the candidate roots
#[derive(Debug, Clone)]
pub struct LocatedDocument {
    pub identifier: Identifier,

    /// `<CODE>.xml`
    pub filename: String,

    /// 1-based priority of the matching root
    pub root_index: usize,

    /// Absolute path on whichever host holds the document
    pub location: String,

    pub source: DocumentSource,

    pub size_bytes: u64,

    /// Hex SHA-256 of the content
    pub sha256: String,
}

impl LocatedDocument {
    /// Outcome recorded when the locate step succeeds
    pub fn outcome(&self) -> StepOutcome {
        StepOutcome::ok(
            StepKind::Locate,
            format!(
                "Found {} in root #{}: {}",
                self.filename, self.root_index, self.location
            ),
        )
        .with_detail(StepDetail::Located {
            root_index: self.root_index,
            path: self.location.clone(),
            size_bytes: self.size_bytes,
            sha256: self.sha256.clone(),
        })
    }
}

/// Input to the stage step
#[derive(Debug, Clone, Copy)]
pub struct StagingRequest<'a> {
    pub document: &'a LocatedDocument,

    /// Optional CSV payload written alongside the document
    pub csv_content: Option<&'a str>,
}

impl<'a> StagingRequest<'a> {
    pub fn new(document: &'a LocatedDocument) -> Self {
        Self {
            document,
            csv_content: None,
        }
    }

    pub fn with_csv(mut self, csv_content: Option<&'a str>) -> Self {
        self.csv_content = csv_content;
        self
    }
}

/// What happened to a timestamped backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBackup {
    /// Backup written next to its source
    Created { backup: String, source: String },

    /// Nothing to back up yet; surfaces as a warning
    Missing { reason: String },

    /// No backup location configured
    Skipped,
}

impl OutputBackup {
    /// Outcome recorded for the backup step
    pub fn outcome(&self) -> StepOutcome {
        match self {
            OutputBackup::Created { backup, source } => StepOutcome::ok(
                StepKind::Backup,
                format!("Backed up {} to {}", source, backup),
            )
            .with_detail(StepDetail::BackedUp {
                backup: backup.clone(),
                source: source.clone(),
            }),
            OutputBackup::Missing { reason } => {
                StepOutcome::warning(StepKind::Backup, format!("No backup taken: {}", reason))
            }
            OutputBackup::Skipped => StepOutcome::ok(StepKind::Backup, "No output backup configured"),
        }
    }
}

/// A document written into the import location
#[derive(Debug, Clone)]
pub struct StagedDocument {
    pub destination: String,

    pub sha256: String,

    pub backup: OutputBackup,

    /// Where a CSV payload was written, if one was supplied
    pub csv_path: Option<String>,
}

impl StagedDocument {
    /// Outcome recorded for the stage step (`warning` when no backup source exists)
    pub fn outcome(&self) -> StepOutcome {
        let (backup, backup_source) = match &self.backup {
            OutputBackup::Created { backup, source } => (Some(backup.clone()), Some(source.clone())),
            _ => (None, None),
        };

        let detail = StepDetail::Staged {
            destination: self.destination.clone(),
            sha256: self.sha256.clone(),
            backup,
            backup_source,
            csv_path: self.csv_path.clone(),
        };

        match &self.backup {
            OutputBackup::Missing { reason } => StepOutcome::warning(
                StepKind::Stage,
                format!("Staged to {}; no backup taken: {}", self.destination, reason),
            ),
            OutputBackup::Created { backup, .. } => StepOutcome::ok(
                StepKind::Stage,
                format!("Staged to {} (backup: {})", self.destination, backup),
            ),
            OutputBackup::Skipped => {
                StepOutcome::ok(StepKind::Stage, format!("Staged to {}", self.destination))
            }
        }
        .with_detail(detail)
    }
}

/// Hex SHA-256 of a byte slice
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
