use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::{InputKind, InputRef, WorkflowState};
use crate::PipelineError;

/// Work out the input kind from the reference alone.
///
/// Inline text is `Text`; `http(s)` URLs are `Web`; files go by extension.
pub fn detect_kind(input: &InputRef) -> Result<InputKind> {
    match input {
        InputRef::Inline(_) => Ok(InputKind::Text),
        InputRef::Url(url) => {
            let lower = url.trim().to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                Ok(InputKind::Web)
            } else {
                Err(PipelineError::UnsupportedInput(format!(
                    "'{}' is not an http(s) URL",
                    url
                )))
            }
        }
        InputRef::Path(path) => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            match ext.as_deref() {
                Some("pdf") => Ok(InputKind::Pdf),
                Some("md") | Some("markdown") => Ok(InputKind::Markdown),
                Some("txt") | Some("text") => Ok(InputKind::Text),
                _ => Err(PipelineError::UnsupportedInput(format!(
                    "{}: unsupported file type",
                    path.display()
                ))),
            }
        }
    }
}

/// `detect-kind`: classify the input and make sure something can read it.
#[derive(Debug, Clone, Default)]
pub struct DetectKind;

impl DetectKind {
    async fn apply(&self, ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        let kind = detect_kind(&state.input)?;
        if ctx.resolver_for(kind, &state.input).is_none() {
            return Err(PipelineError::UnsupportedInput(format!(
                "no resolver registered for {} input",
                kind
            )));
        }
        tracing::debug!(input = %state.input, kind = %kind, "input kind detected");
        state.input_kind = Some(kind);
        Ok(())
    }
}

impl Stage for DetectKind {
    fn name(&self) -> StageName {
        StageName::DetectKind
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, mut state: WorkflowState) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let result = self.apply(ctx, &mut state).await;
            StageResult::from_result(self.name(), state, result)
        })
    }
}
