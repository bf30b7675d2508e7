//! Run state for a single reprocessing invocation.
//!
//! A run moves `Validating → Locating → Staging → Transforming →
//! BackingUp → Submitting → Done`. Any `error` outcome moves it to `Failed`, which
//! absorbs every later step: nothing is recorded after the first error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    Identifier, LocatedDocument, OutputBackup, RecordedStep, StagedDocument, StepKind, StepOutcome,
    StepStatus,
};

use super::error::StepError;

/// Position of a run in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Locating,
    Staging,
    Transforming,
    BackingUp,
    Submitting,
    Done,
    Failed,
}

impl Stage {
    /// The step executed while in this stage
    pub fn step(&self) -> Option<StepKind> {
        match self {
            Stage::Validating => Some(StepKind::Validate),
            Stage::Locating => Some(StepKind::Locate),
            Stage::Staging => Some(StepKind::Stage),
            Stage::Transforming => Some(StepKind::Transform),
            Stage::BackingUp => Some(StepKind::Backup),
            Stage::Submitting => Some(StepKind::Submit),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Stage following a passing outcome of this stage's step
    pub fn next(&self) -> Stage {
        match self {
            Stage::Validating => Stage::Locating,
            Stage::Locating => Stage::Staging,
            Stage::Staging => Stage::Transforming,
            Stage::Transforming => Stage::BackingUp,
            Stage::BackingUp => Stage::Submitting,
            Stage::Submitting => Stage::Done,
            Stage::Done => Stage::Done,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Step results that know how to describe themselves
pub trait Reportable {
    fn outcome(&self) -> StepOutcome;
}

impl Reportable for Identifier {
    fn outcome(&self) -> StepOutcome {
        Identifier::outcome(self)
    }
}

impl Reportable for LocatedDocument {
    fn outcome(&self) -> StepOutcome {
        LocatedDocument::outcome(self)
    }
}

impl Reportable for StagedDocument {
    fn outcome(&self) -> StepOutcome {
        StagedDocument::outcome(self)
    }
}

impl Reportable for OutputBackup {
    fn outcome(&self) -> StepOutcome {
        OutputBackup::outcome(self)
    }
}

/// In-memory record of one pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,

    /// Code as received, uppercased
    pub code: String,

    pub started_at: DateTime<Utc>,

    stage: Stage,

    steps: Vec<RecordedStep>,
}

impl PipelineRun {
    pub fn new(raw_code: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: raw_code.to_uppercase(),
            started_at: Utc::now(),
            stage: Stage::Validating,
            steps: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn steps(&self) -> &[RecordedStep] {
        &self.steps
    }

    /// Append the outcome of the current stage's step.
    ///
    /// Returns `true` when the run may continue. Outcomes offered after the
    /// run is terminal are dropped.
    pub fn record(&mut self, outcome: StepOutcome) -> bool {
        if self.stage.is_terminal() {
            warn!(stage = ?self.stage, kind = ?outcome.kind, "Dropping outcome for finished run");
            return false;
        }

        if self.stage.step() != Some(outcome.kind) {
            debug!(stage = ?self.stage, kind = ?outcome.kind, "Outcome kind differs from stage");
        }

        let passing = outcome.status.is_passing();
        self.steps.push(RecordedStep {
            step: self.steps.len() as u32 + 1,
            outcome,
        });

        self.stage = if passing { self.stage.next() } else { Stage::Failed };
        passing
    }

    /// Record a step result, handing back the value when the run may continue
    pub fn settle<T: Reportable>(&mut self, kind: StepKind, result: Result<T, StepError>) -> Option<T> {
        match result {
            Ok(value) => self.record(value.outcome()).then_some(value),
            Err(e) => {
                self.record(e.into_outcome(kind));
                None
            }
        }
    }

    /// Move past a stage whose step is not configured for this topology
    pub fn skip(&mut self, stage: Stage) {
        if self.stage == stage {
            debug!(?stage, "Skipping stage");
            self.stage = stage.next();
        }
    }

    /// `true` iff every outcome is `ok` or `warning`
    pub fn success(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.outcome.status.is_passing())
    }

    pub fn warning_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome.status == StepStatus::Warning)
            .count()
    }

    /// One-line human summary of the run
    pub fn summary(&self) -> String {
        if let Some(failed) = self.steps.iter().find(|s| s.outcome.is_error()) {
            return format!("Error at step {}: {}", failed.step, failed.outcome.message);
        }

        match self.warning_count() {
            0 => format!("Reprocessing of {} completed successfully", self.code),
            n => format!(
                "Reprocessing of {} completed with {} warning(s)",
                self.code, n
            ),
        }
    }

    /// Close the run and produce the caller-facing report
    pub fn finish(self) -> ReprocessReport {
        ReprocessReport {
            success: self.success(),
            summary: self.summary(),
            run_id: self.id,
            code: self.code,
            steps: self.steps,
        }
    }
}

/// Result of `reprocess`, returned to the caller and never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessReport {
    pub success: bool,
    pub code: String,
    pub steps: Vec<RecordedStep>,
    pub summary: String,
    pub run_id: Uuid,
}

impl ReprocessReport {
    /// The terminal error outcome, if the run failed
    pub fn failed_step(&self) -> Option<&RecordedStep> {
        self.steps.iter().find(|s| s.outcome.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Validating;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            seen.push(stage);
        }

        assert_eq!(
            seen,
            vec![
                Stage::Validating,
                Stage::Locating,
                Stage::Staging,
                Stage::Transforming,
                Stage::BackingUp,
                Stage::Submitting,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn test_error_is_absorbing() {
        let mut run = PipelineRun::new("q1234567");

        assert!(run.record(StepOutcome::ok(StepKind::Validate, "ok")));
        assert!(!run.record(StepOutcome::error(
            StepKind::Locate,
            FailureKind::NotFound,
            "missing"
        )));
        assert_eq!(run.stage(), Stage::Failed);

        // Anything offered afterwards is dropped
        assert!(!run.record(StepOutcome::ok(StepKind::Stage, "late")));
        assert_eq!(run.steps().len(), 2);

        let report = run.finish();
        assert!(!report.success);
        assert_eq!(report.code, "Q1234567");
        assert_eq!(report.summary, "Error at step 2: missing");
        assert_eq!(report.failed_step().map(|s| s.step), Some(2));
    }

    #[test]
    fn test_warning_does_not_block() {
        let mut run = PipelineRun::new("Q1234567");
        run.record(StepOutcome::ok(StepKind::Validate, "ok"));
        run.record(StepOutcome::ok(StepKind::Locate, "ok"));
        assert!(run.record(StepOutcome::warning(StepKind::Stage, "no backup")));
        assert_eq!(run.stage(), Stage::Transforming);

        run.skip(Stage::Transforming);
        run.skip(Stage::BackingUp);
        assert_eq!(run.stage(), Stage::Submitting);

        run.record(StepOutcome::ok(StepKind::Submit, "ok"));
        assert_eq!(run.stage(), Stage::Done);

        let report = run.finish();
        assert!(report.success);
        assert!(report.summary.contains("1 warning"));
        let ordinals: Vec<u32> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_settle_returns_value_only_when_passing() {
        struct Fine;
        impl Reportable for Fine {
            fn outcome(&self) -> StepOutcome {
                StepOutcome::ok(StepKind::Validate, "fine")
            }
        }

        let mut run = PipelineRun::new("Q1234567");
        assert!(run.settle(StepKind::Validate, Ok(Fine)).is_some());

        let failed: Option<Fine> = run.settle(
            StepKind::Locate,
            Err(StepError::NotConfigured("search roots")),
        );
        assert!(failed.is_none());
        assert_eq!(
            run.steps()[1].outcome.failure_kind,
            Some(FailureKind::Configuration)
        );
    }
}
