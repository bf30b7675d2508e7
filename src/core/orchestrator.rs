//! Main orchestrator for reprocessing runs.
//!
//! Drives one run through validate, locate, stage, transform, output
//! backup and submit, recording every attempted step. The first `error` ends the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::adapters::{
    DocumentStore, ErpSubmitter, LocalFilesystemStore, RelayHttpStore, SubmitRequest,
    TransformExecutor,
};
use crate::config::{Config, Topology};
use crate::domain::{validate, OutputBackup, StagingRequest, StepKind};

use super::error::StepError;
use super::pipeline::{PipelineRun, ReprocessReport, Stage};

/// Input to a reprocessing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub code: String,

    /// CSV written to the import path during staging
    #[serde(default)]
    pub csv_content: Option<String>,
}

impl ReprocessRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            csv_content: None,
        }
    }

    pub fn with_csv(mut self, csv_content: impl Into<String>) -> Self {
        self.csv_content = Some(csv_content.into());
        self
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    transform: Option<TransformExecutor>,

    /// Fail the transform step when no command is configured
    require_transform: bool,

    submitter: ErpSubmitter,
    submit_request: SubmitRequest,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transform: Option<TransformExecutor>,
        submitter: ErpSubmitter,
        submit_request: SubmitRequest,
    ) -> Self {
        Self {
            store,
            transform,
            require_transform: false,
            submitter,
            submit_request,
        }
    }

    /// Record a configuration error instead of skipping a missing transform
    pub fn require_transform(mut self, required: bool) -> Self {
        self.require_transform = required;
        self
    }

    /// Build the orchestrator for the configured topology
    pub fn from_config(config: &Config) -> Result<Self> {
        let pipeline = &config.pipeline;

        let store: Arc<dyn DocumentStore> = match pipeline.topology {
            Topology::Local => {
                let mut store = LocalFilesystemStore::new(pipeline.search_roots.clone());
                if let Some(dir) = &pipeline.import_dir {
                    store = store.with_import_dir(dir);
                }
                if let Some(dir) = &pipeline.csv_output_dir {
                    store = store.with_output_backup(dir, pipeline.backup_prefix.clone());
                }
                if let Some(path) = &pipeline.csv_import_path {
                    store = store.with_csv_import_path(path);
                }
                Arc::new(store)
            }
            Topology::Relay => {
                let url = config
                    .relay
                    .url
                    .as_deref()
                    .context("relay.url is required for the relay topology")?;
                let token = config
                    .relay
                    .token
                    .clone()
                    .context("relay.token (or DOCPIPE_RELAY_TOKEN) is required for the relay topology")?;
                Arc::new(RelayHttpStore::new(
                    url,
                    token,
                    Duration::from_secs(config.relay.timeout_secs),
                )?)
            }
        };

        let transform = pipeline
            .transform
            .clone()
            .map(|command| TransformExecutor::new(command).with_timeout(pipeline.transform_timeout()));

        let erp = &config.erp;
        let submitter = ErpSubmitter::new(
            erp.url.clone(),
            erp.user.clone(),
            erp.password.clone(),
            erp.timeout(),
            erp.accept_invalid_certs,
        )?
        .with_fault_marker(erp.fault_marker.clone());

        let submit_request = SubmitRequest {
            template: erp.template.clone(),
            pool_alias: erp.pool_alias.clone(),
            language: erp.language.clone(),
        };

        Ok(Self::new(store, transform, submitter, submit_request)
            .require_transform(pipeline.topology == Topology::Local))
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn transform(&self) -> Option<&TransformExecutor> {
        self.transform.as_ref()
    }

    pub fn submitter(&self) -> &ErpSubmitter {
        &self.submitter
    }

    /// Reprocess a single document code
    pub async fn reprocess(&self, code: &str) -> ReprocessReport {
        self.reprocess_request(&ReprocessRequest::new(code)).await
    }

    /// Run the full pipeline for one request.
    ///
    /// Never fails: every problem becomes a recorded step outcome.
    #[instrument(skip(self, request), fields(run_id = tracing::field::Empty, code = %request.code, store = self.store.name()))]
    pub async fn reprocess_request(&self, request: &ReprocessRequest) -> ReprocessReport {
        let mut run = PipelineRun::new(&request.code);
        tracing::Span::current().record("run_id", tracing::field::display(run.id));
        info!("Starting reprocessing run");

        self.drive(&mut run, request).await;

        let report = run.finish();
        match report.failed_step() {
            Some(failed) => error!(
                step = failed.step,
                kind = failed.outcome.kind.label(),
                failure = ?failed.outcome.failure_kind,
                message = %failed.outcome.message,
                "Run failed"
            ),
            None => info!(summary = %report.summary, "Run completed"),
        }
        report
    }

    async fn drive(&self, run: &mut PipelineRun, request: &ReprocessRequest) {
        let Some(identifier) = run.settle(StepKind::Validate, validate(&request.code)) else {
            return;
        };

        let Some(document) = run.settle(StepKind::Locate, self.store.locate(&identifier).await) else {
            return;
        };

        let staging = StagingRequest::new(&document).with_csv(request.csv_content.as_deref());
        if run.settle(StepKind::Stage, self.store.stage(staging).await).is_none() {
            return;
        }

        match &self.transform {
            Some(transform) => {
                if run.settle(StepKind::Transform, transform.run().await).is_none() {
                    return;
                }
            }
            None if self.require_transform => {
                run.record(StepError::NotConfigured("transform command").into_outcome(StepKind::Transform));
                return;
            }
            None => {
                warn!("No transform configured; submitting staged document directly");
                run.skip(Stage::Transforming);
            }
        }

        match self.store.backup_output().await {
            Ok(OutputBackup::Skipped) => run.skip(Stage::BackingUp),
            result => {
                if run.settle(StepKind::Backup, result).is_none() {
                    return;
                }
            }
        }

        run.settle(StepKind::Submit, self.submitter.submit(&self.submit_request).await);
    }

    /// Check each configured collaborator before a run
    pub async fn health_check(&self) -> Result<()> {
        self.store
            .health_check()
            .await
            .with_context(|| format!("{} store is not ready", self.store.name()))?;

        if let Some(transform) = &self.transform {
            transform.health_check()?;
        } else if self.require_transform {
            anyhow::bail!("No transform command configured");
        }

        if self.submitter.url().is_none() {
            anyhow::bail!("No ERP URL configured");
        }

        Ok(())
    }
}
