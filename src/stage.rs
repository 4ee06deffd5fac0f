//! The stage abstraction.
//!
//! A [`Stage`] takes the [`WorkflowState`] by value and hands it back inside
//! a [`StageResult`] tagged with an outcome. Stages never return errors past
//! this boundary: a failure is classified, recorded on the state, and reported
//! through the outcome so the engine alone decides what happens next.

use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::WorkflowState;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, Send future -- the return type of [`Stage::run`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The six stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    DetectKind,
    Parse,
    Transform,
    GenerateImages,
    Render,
    Validate,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::DetectKind,
        StageName::Parse,
        StageName::Transform,
        StageName::GenerateImages,
        StageName::Render,
        StageName::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::DetectKind => "detect-kind",
            StageName::Parse => "parse",
            StageName::Transform => "transform",
            StageName::GenerateImages => "generate-images",
            StageName::Render => "render",
            StageName::Validate => "validate",
        }
    }

    /// Position in [`ALL`](Self::ALL).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that follows on success, `None` after `validate`.
    pub fn next(&self) -> Option<StageName> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Share of the pipeline complete once this stage has run.
    pub fn fraction(&self) -> f64 {
        (self.index() + 1) as f64 / Self::ALL.len() as f64
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    RetryableFailure,
    /// Must never be retried, whatever the remaining budget.
    TerminalFailure,
}

/// What every stage returns.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub state: WorkflowState,
    pub outcome: StageOutcome,
    /// Human-readable error detail when the stage failed.
    pub error: Option<String>,
}

impl StageResult {
    pub fn success(state: WorkflowState) -> Self {
        Self {
            state,
            outcome: StageOutcome::Success,
            error: None,
        }
    }

    /// Record `err` against `stage` and tag the result by its class.
    pub fn failure(stage: StageName, mut state: WorkflowState, err: &PipelineError) -> Self {
        let record = state.record_error(stage, err);
        let outcome = if record.is_retryable() {
            StageOutcome::RetryableFailure
        } else {
            StageOutcome::TerminalFailure
        };
        let error = Some(record.message.clone());
        Self {
            state,
            outcome,
            error,
        }
    }

    /// Fold the `Result` of a stage body into a tagged result.
    pub fn from_result(stage: StageName, state: WorkflowState, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(state),
            Err(e) => Self::failure(stage, state, &e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Success
    }
}

/// One named transformation of the workflow state.
///
/// # Object Safety
///
/// This trait is object-safe; the engine stores stages as `Box<dyn Stage>`,
/// so any built-in can be swapped for a custom implementation.
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Run against `state`, consuming it and returning it enriched.
    fn run<'a>(&'a self, ctx: &'a ExecCtx, state: WorkflowState) -> BoxFut<'a, StageResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InputRef, OutputKind};

    #[test]
    fn test_order_and_next() {
        assert_eq!(StageName::DetectKind.next(), Some(StageName::Parse));
        assert_eq!(StageName::Render.next(), Some(StageName::Validate));
        assert_eq!(StageName::Validate.next(), None);
        assert_eq!(StageName::GenerateImages.index(), 3);
    }

    #[test]
    fn test_fraction() {
        assert!((StageName::DetectKind.fraction() - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(StageName::Validate.fraction(), 1.0);
    }

    #[test]
    fn test_serde_names() {
        let s = serde_json::to_string(&StageName::GenerateImages).unwrap();
        assert_eq!(s, "\"generate-images\"");
        assert_eq!(StageName::GenerateImages.to_string(), "generate-images");
    }

    #[test]
    fn test_failure_is_tagged_by_class() {
        let state = WorkflowState::new(InputRef::inline("x"), OutputKind::Markdown);
        let result = StageResult::failure(
            StageName::Render,
            state,
            &PipelineError::Timeout {
                provider: "mock".into(),
            },
        );
        assert_eq!(result.outcome, StageOutcome::RetryableFailure);
        assert_eq!(result.state.errors.len(), 1);

        let result = StageResult::failure(
            StageName::Parse,
            result.state,
            &PipelineError::UnsupportedInput("scan.tiff".into()),
        );
        assert_eq!(result.outcome, StageOutcome::TerminalFailure);
        assert!(result.error.unwrap().contains("scan.tiff"));
    }

    #[test]
    fn test_from_result_ok() {
        let state = WorkflowState::new(InputRef::inline("x"), OutputKind::Markdown);
        let result = StageResult::from_result(StageName::Parse, state, Ok(()));
        assert!(result.is_success());
        assert!(result.error.is_none());
    }
}
