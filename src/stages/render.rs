use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::WorkflowState;
use crate::PipelineError;

/// `render`: hand the structured content to the renderer for the requested
/// output kind and keep the artifact location.
#[derive(Debug, Clone, Default)]
pub struct Render;

impl Render {
    async fn apply(&self, ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        // a previous attempt's artifact must not survive a failed re-render
        state.output = None;

        let content = state
            .content
            .as_ref()
            .ok_or_else(|| PipelineError::Other("render ran before transform".into()))?;
        let renderer = ctx.renderer_for(state.output_kind).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "no renderer registered for {} output",
                state.output_kind
            ))
        })?;

        let artifact = renderer
            .render(content, state.output_kind, ctx.output_dir())
            .await?;
        tracing::info!(
            renderer = renderer.name(),
            path = %artifact.path.display(),
            attempt = state.attempt,
            "artifact rendered"
        );
        state.output = Some(artifact);
        Ok(())
    }
}

impl Stage for Render {
    fn name(&self) -> StageName {
        StageName::Render
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, mut state: WorkflowState) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let result = self.apply(ctx, &mut state).await;
            StageResult::from_result(self.name(), state, result)
        })
    }
}
