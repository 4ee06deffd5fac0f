use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::WorkflowState;
use crate::PipelineError;

/// `parse`: pull raw text out of the input through its resolver.
#[derive(Debug, Clone, Default)]
pub struct Parse;

impl Parse {
    async fn apply(&self, ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        let kind = state
            .input_kind
            .ok_or_else(|| PipelineError::Other("parse ran before detect-kind".into()))?;
        let resolver = ctx.resolver_for(kind, &state.input).ok_or_else(|| {
            PipelineError::UnsupportedInput(format!("no resolver registered for {} input", kind))
        })?;

        let text = resolver.resolve(kind, &state.input).await?;
        if text.trim().is_empty() {
            return Err(PipelineError::InputUnavailable(format!(
                "{} contains no text",
                state.input
            )));
        }
        tracing::info!(
            resolver = resolver.name(),
            chars = text.chars().count(),
            "input parsed"
        );
        state.raw_text = Some(text);
        Ok(())
    }
}

impl Stage for Parse {
    fn name(&self) -> StageName {
        StageName::Parse
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, mut state: WorkflowState) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let result = self.apply(ctx, &mut state).await;
            StageResult::from_result(self.name(), state, result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageOutcome;
    use crate::stages::test_support::rig;
    use crate::types::{InputKind, InputRef, OutputKind};

    #[tokio::test]
    async fn test_parse_inline() {
        let rig = rig();
        let mut state = WorkflowState::new(InputRef::inline("Some notes"), OutputKind::Markdown);
        state.input_kind = Some(InputKind::Text);
        let result = Parse.run(&rig.ctx, state).await;
        assert!(result.is_success());
        assert_eq!(result.state.raw_text.as_deref(), Some("Some notes"));
    }

    #[tokio::test]
    async fn test_blank_input_is_terminal() {
        let rig = rig();
        let mut state = WorkflowState::new(InputRef::inline("  \n\t "), OutputKind::Markdown);
        state.input_kind = Some(InputKind::Text);
        let result = Parse.run(&rig.ctx, state).await;
        assert_eq!(result.outcome, StageOutcome::TerminalFailure);
    }

    #[tokio::test]
    async fn test_missing_file_is_terminal() {
        let rig = rig();
        let mut state = WorkflowState::new(InputRef::path("/nope/missing.md"), OutputKind::Markdown);
        state.input_kind = Some(InputKind::Markdown);
        let result = Parse.run(&rig.ctx, state).await;
        assert_eq!(result.outcome, StageOutcome::TerminalFailure);
        assert!(result.state.raw_text.is_none());
    }
}
