//! Direct-filesystem document store.
//!
//! Searches ordered local roots for `<CODE>.xml`, copies the match into a
//! single import folder, and backs up the newest CSV the transform wrote.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::DocumentStore;
use crate::core::backup::{backup_latest_output, write_with_backup};
use crate::core::safety::resolve_within;
use crate::core::StepError;
use crate::domain::{
    content_digest, DocumentSource, Identifier, LocatedDocument, OutputBackup, StagedDocument,
    StagingRequest,
};

/// Default prefix for CSV output backups
pub const DEFAULT_BACKUP_PREFIX: &str = "importcsv";

/// Store backed by directories on this host
#[derive(Debug, Clone)]
pub struct LocalFilesystemStore {
    /// Candidate roots, highest priority first
    roots: Vec<PathBuf>,

    /// Single folder the transform imports from
    import_dir: Option<PathBuf>,

    /// Folder where the transform writes its CSV output
    output_dir: Option<PathBuf>,

    /// Prefix of `<prefix>_<timestamp>.csv` backups
    backup_prefix: String,

    /// Destination for CSV payloads supplied with a run
    csv_import_path: Option<PathBuf>,
}

impl LocalFilesystemStore {
    /// Create a store searching `roots` in order
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            import_dir: None,
            output_dir: None,
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            csv_import_path: None,
        }
    }

    pub fn with_import_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.import_dir = Some(dir.into());
        self
    }

    /// Back up the newest `*.csv` in `dir` after each transform
    pub fn with_output_backup(mut self, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self.backup_prefix = prefix.into();
        self
    }

    pub fn with_csv_import_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_import_path = Some(path.into());
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find `<stem>.xml` in the first root that holds it.
    ///
    /// Returns the 1-based root index and the canonical path. Blank roots
    /// are skipped but keep their position. A name that resolves outside a
    /// root fails immediately with a security error; later roots are not
    /// tried.
    pub async fn find(&self, stem: &str) -> Result<(usize, PathBuf), StepError> {
        if self.searchable_roots().next().is_none() {
            return Err(StepError::NotConfigured("search roots"));
        }

        let filename = format!("{}.xml", stem);

        for (index, root) in self.roots.iter().enumerate() {
            if is_blank(root) {
                debug!(position = index + 1, "Skipping blank search root");
                continue;
            }

            let candidate = resolve_within(root, &filename)?;

            match fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => {
                    debug!(root = %root.display(), path = %candidate.display(), "Candidate matched");
                    return Ok((index + 1, candidate));
                }
                _ => debug!(root = %root.display(), "Not in candidate root"),
            }
        }

        Err(StepError::NotFound {
            filename,
            searched_paths: self.searchable_roots().map(|r| r.display().to_string()).collect(),
        })
    }

    fn searchable_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.roots.iter().filter(|root| !is_blank(root))
    }

    async fn copy_into_import(&self, document: &LocatedDocument) -> Result<PathBuf, StepError> {
        let import_dir = self
            .import_dir
            .as_deref()
            .ok_or(StepError::NotConfigured("import directory"))?;

        fs::create_dir_all(import_dir).await.map_err(|e| {
            StepError::io(format!("Cannot create {}", import_dir.display()), e)
        })?;

        let destination = resolve_within(import_dir, &document.filename)?;

        match &document.source {
            DocumentSource::Path(source) => {
                fs::copy(source, &destination).await.map_err(|e| {
                    StepError::io(format!("Cannot copy {}", source.display()), e)
                })?;
            }
            DocumentSource::Inline(content) => {
                fs::write(&destination, content).await.map_err(|e| {
                    StepError::io(format!("Cannot write {}", destination.display()), e)
                })?;
            }
        }

        Ok(destination)
    }

}

fn is_blank(root: &Path) -> bool {
    root.as_os_str().is_empty()
}

async fn read_document(path: &Path) -> Result<Vec<u8>, StepError> {
    fs::read(path)
        .await
        .map_err(|e| StepError::io(format!("Cannot read {}", path.display()), e))
}

#[async_trait]
impl DocumentStore for LocalFilesystemStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn locate(&self, identifier: &Identifier) -> Result<LocatedDocument, StepError> {
        let (root_index, path) = self.find(identifier.as_str()).await?;
        let bytes = read_document(&path).await?;

        info!(code = %identifier, root_index, path = %path.display(), "Document located");

        Ok(LocatedDocument {
            identifier: identifier.clone(),
            filename: identifier.filename(),
            root_index,
            location: path.display().to_string(),
            size_bytes: bytes.len() as u64,
            sha256: content_digest(&bytes),
            source: DocumentSource::Path(path),
        })
    }

    async fn stage(&self, request: StagingRequest<'_>) -> Result<StagedDocument, StepError> {
        let destination = self.copy_into_import(request.document).await?;
        let sha256 = content_digest(&read_document(&destination).await?);

        let (backup, csv_path) = match request.csv_content {
            Some(csv) => {
                let path = self
                    .csv_import_path
                    .as_deref()
                    .ok_or(StepError::NotConfigured("CSV import path"))?;
                let receipt = write_with_backup(path, csv.as_bytes())
                    .await
                    .map_err(|e| StepError::io(format!("Cannot write {}", path.display()), e))?;
                (
                    OutputBackup::Created {
                        backup: receipt.backup.display().to_string(),
                        source: receipt.path.display().to_string(),
                    },
                    Some(receipt.path.display().to_string()),
                )
            }
            None => (OutputBackup::Skipped, None),
        };

        info!(destination = %destination.display(), "Document staged");

        Ok(StagedDocument {
            destination: destination.display().to_string(),
            sha256,
            backup,
            csv_path,
        })
    }

    async fn backup_output(&self) -> Result<OutputBackup, StepError> {
        let Some(dir) = self.output_dir.as_deref() else {
            return Ok(OutputBackup::Skipped);
        };

        let snapshot = backup_latest_output(dir, "csv", &self.backup_prefix)
            .await
            .map_err(|e| StepError::io(format!("Cannot back up output in {}", dir.display()), e))?;

        Ok(match snapshot {
            Some(snapshot) => {
                info!(backup = %snapshot.backup.display(), "Transform output backed up");
                OutputBackup::Created {
                    backup: snapshot.backup.display().to_string(),
                    source: snapshot.source.display().to_string(),
                }
            }
            None => OutputBackup::Missing {
                reason: format!("no CSV output in {}", dir.display()),
            },
        })
    }

    async fn health_check(&self) -> Result<()> {
        if !self.roots.iter().any(|root| root.is_dir()) {
            anyhow::bail!("None of the {} search roots exist", self.roots.len());
        }
        Ok(())
    }
}
