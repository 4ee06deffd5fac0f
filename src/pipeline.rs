//! The workflow engine.
//!
//! [`Pipeline::run`] walks the stages in their fixed order, threading one
//! [`WorkflowState`] through them. After `validate` (or a failed `render`) the
//! [`RetryPolicy`] decides whether the run is done, loops back to `render`
//! after a cool-down, or gives up. Cancellation is honoured at every stage
//! boundary, including the one after a cool-down.
//!
//! Stages only queue their cache writes on the state. The engine commits
//! them when the run ends, unless the run was cancelled.
//!
//! ```text
//! detect-kind ─► parse ─► transform ─► generate-images ─► render ─► validate ─► decide
//!                                                            ▲                    │
//!                                                            └──── retry ─────────┘
//! ```

use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stage::{Stage, StageName, StageOutcome};
use crate::stages::default_stages;
use crate::types::{ArtifactRef, InputRef, OutputKind, StageError, WorkflowState};
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Everything a caller learns from a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// Present only when the run succeeded.
    pub output: Option<ArtifactRef>,
    /// Every error recorded, across all attempts, oldest first.
    pub errors: Vec<StageError>,
    /// Attempts of the render/validate pair that were started.
    pub attempts: u32,
    /// The final workflow state.
    pub state: WorkflowState,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// The artifact, or the last recorded error.
    pub fn into_result(self) -> Result<ArtifactRef> {
        match (self.status, self.output) {
            (RunStatus::Succeeded, Some(output)) => Ok(output),
            _ => Err(PipelineError::RunFailed {
                attempts: self.attempts,
                message: self
                    .errors
                    .last()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error recorded".to_string()),
            }),
        }
    }
}

enum Step {
    Run(StageName),
    Decide,
}

/// The stage sequencer with its retry policy.
///
/// # Example
///
/// ```no_run
/// use doc_pipeline::{ExecCtx, InputRef, OutputKind, Pipeline, PipelineConfig};
///
/// # async fn demo() -> doc_pipeline::Result<()> {
/// let ctx = ExecCtx::builder(PipelineConfig::default()).build()?;
/// let pipeline = Pipeline::builder(ctx).build();
/// let report = pipeline
///     .execute(InputRef::path("notes.md"), OutputKind::Markdown)
///     .await;
/// println!("{:?} after {} attempt(s)", report.status, report.attempts);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    ctx: ExecCtx,
    policy: RetryPolicy,
    /// Indexed by [`StageName::index`].
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ctx", &self.ctx)
            .field("policy", &self.policy)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Start a builder with the built-in stages and the config's attempt budget.
    pub fn builder(ctx: ExecCtx) -> PipelineBuilder {
        PipelineBuilder {
            policy: RetryPolicy::new(ctx.config.max_attempts),
            ctx,
            stages: default_stages(),
        }
    }

    pub fn ctx(&self) -> &ExecCtx {
        &self.ctx
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a fresh request for `input`.
    pub async fn execute(&self, input: InputRef, output_kind: OutputKind) -> RunReport {
        self.run(WorkflowState::new(input, output_kind)).await
    }

    /// Drive `state` through the stages until it succeeds or fails.
    pub async fn run(&self, mut state: WorkflowState) -> RunReport {
        let ctx = &self.ctx;
        tracing::info!(input = %state.input, output = %state.output_kind, "pipeline started");

        let mut step = Step::Run(StageName::DetectKind);
        let status = loop {
            step = match step {
                Step::Run(name) => {
                    if let Err(e) = ctx.check_cancelled() {
                        tracing::info!(stage = %name, "cancelled at stage boundary");
                        state.record_error(name, &e);
                        break RunStatus::Failed;
                    }
                    emit(
                        &ctx.event_handler,
                        Event::StageStarted {
                            stage: name,
                            attempt: state.attempt,
                        },
                    );

                    let result = self.stages[name.index()].run(ctx, state).await;
                    state = result.state;
                    let message = match result.error {
                        Some(ref e) => format!("failed: {}", e),
                        None => "done".to_string(),
                    };
                    emit(
                        &ctx.event_handler,
                        Event::StageProgress {
                            stage: name,
                            fraction: name.fraction(),
                            message,
                            attempt: state.attempt,
                        },
                    );

                    match result.outcome {
                        StageOutcome::Success => match name.next() {
                            Some(next) => Step::Run(next),
                            None => Step::Decide,
                        },
                        _ if matches!(name, StageName::Render | StageName::Validate) => Step::Decide,
                        outcome => {
                            tracing::warn!(
                                stage = %name,
                                ?outcome,
                                error = result.error.as_deref().unwrap_or_default(),
                                "stage failed before render, giving up"
                            );
                            break RunStatus::Failed;
                        }
                    }
                }
                Step::Decide => match self.policy.decide(&state) {
                    RetryDecision::Finish => break RunStatus::Succeeded,
                    RetryDecision::Stop => break RunStatus::Failed,
                    RetryDecision::Retry { delay } => {
                        let reason = state
                            .last_error()
                            .map(|e| e.message.clone())
                            .unwrap_or_default();
                        tracing::info!(
                            attempt = state.attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "retrying render"
                        );
                        emit(
                            &ctx.event_handler,
                            Event::RetryScheduled {
                                next_attempt: state.attempt + 1,
                                delay_ms: delay.as_millis() as u64,
                                reason,
                            },
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        state.attempt += 1;
                        state.errors.clear();
                        state.output = None;
                        Step::Run(StageName::Render)
                    }
                },
            };
        };

        if status == RunStatus::Failed {
            state.output = None;
        }
        let writes = std::mem::take(&mut state.pending_cache_writes);
        if ctx.is_cancelled() {
            if !writes.is_empty() {
                tracing::info!(discarded = writes.len(), "cancelled, dropping this run's cache writes");
            }
        } else {
            ctx.cache.commit(writes);
        }
        let succeeded = status == RunStatus::Succeeded;
        emit(
            &ctx.event_handler,
            Event::WorkflowFinished {
                succeeded,
                attempts: state.attempt,
            },
        );
        match status {
            RunStatus::Succeeded => tracing::info!(attempts = state.attempt, "pipeline succeeded"),
            RunStatus::Failed => tracing::warn!(
                attempts = state.attempt,
                errors = state.error_history.len(),
                "pipeline failed"
            ),
        }

        RunReport {
            status,
            output: state.output.clone(),
            errors: state.error_history.clone(),
            attempts: state.attempt,
            state,
        }
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    ctx: ExecCtx,
    policy: RetryPolicy,
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    /// Override the retry policy. Default: `max_attempts` from the config
    /// with the standard backoff.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the built-in stage with the same [`name`](Stage::name).
    pub fn stage(mut self, stage: Box<dyn Stage>) -> Self {
        let idx = stage.name().index();
        self.stages[idx] = stage;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            ctx: self.ctx,
            policy: self.policy,
            stages: self.stages,
        }
    }
}
