use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::{ArtifactRef, OutputKind, WorkflowState};
use crate::PipelineError;

/// Check that a rendered artifact exists, is non-empty and looks like its kind.
///
/// PDFs must start with `%PDF-`, slide decks are zip containers (`PK`), and
/// Markdown must be valid UTF-8.
pub async fn validate_artifact(artifact: &ArtifactRef) -> Result<()> {
    let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
        PipelineError::Validation(format!("{}: {}", artifact.path.display(), e))
    })?;
    if bytes.is_empty() {
        return Err(PipelineError::Validation(format!(
            "{} is empty",
            artifact.path.display()
        )));
    }
    let ok = match artifact.kind {
        OutputKind::Pdf => bytes.starts_with(b"%PDF-"),
        OutputKind::Slides => bytes.starts_with(b"PK"),
        OutputKind::Markdown => std::str::from_utf8(&bytes).is_ok(),
    };
    if !ok {
        return Err(PipelineError::Validation(format!(
            "{} is not a valid {} file",
            artifact.path.display(),
            artifact.kind
        )));
    }
    Ok(())
}

/// `validate`: confirm the rendered artifact is usable.
///
/// Failures here are retryable; the engine decides whether to render again.
#[derive(Debug, Clone, Default)]
pub struct Validate;

impl Validate {
    async fn apply(&self, _ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        let artifact = state
            .output
            .as_ref()
            .ok_or_else(|| PipelineError::Validation("no artifact was rendered".into()))?;
        validate_artifact(artifact).await?;
        tracing::debug!(path = %artifact.path.display(), "artifact validated");
        Ok(())
    }
}

impl Stage for Validate {
    fn name(&self) -> StageName {
        StageName::Validate
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, mut state: WorkflowState) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let result = self.apply(ctx, &mut state).await;
            StageResult::from_result(self.name(), state, result)
        })
    }
}
