use crate::backend::{GenerationParams, GenerationRequest};
use crate::cache::{CachedArtifact, Fingerprint, FingerprintParams, PendingWrite};
use crate::error::Result;
use crate::events::{emit, CacheScope, Event};
use crate::exec_ctx::ExecCtx;
use crate::parsing::parse_structured;
use crate::prompt::{self, PROMPT_VERSION, STRUCTURE_SYSTEM_PROMPT};
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::{InputKind, StructuredContent, WorkflowState};
use crate::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_TIMESTAMP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d{1,2}:\d{2}(:\d{2})?\s*$").unwrap());

/// Rough description of the source, fed to the structuring prompt.
///
/// Text with more than ten bare timestamp lines reads as a transcript; PDFs
/// are usually exported slides.
pub fn content_type_hint(kind: Option<InputKind>, raw_text: &str) -> &'static str {
    if RE_TIMESTAMP_LINE.find_iter(raw_text).count() > 10 {
        "transcript"
    } else if kind == Some(InputKind::Pdf) {
        "slides"
    } else {
        "document"
    }
}

/// `transform`: restructure raw text into titled sections, through the cache.
#[derive(Debug, Clone, Default)]
pub struct Transform;

impl Transform {
    fn cache_key(ctx: &ExecCtx, state: &WorkflowState, raw: &str, content_type: &str) -> (Fingerprint, FingerprintParams) {
        let spec = &ctx.providers.text_spec;
        let params = FingerprintParams::new()
            .with("stage", "structure")
            .with("prompt_version", PROMPT_VERSION)
            .with("provider", ctx.providers.text.id())
            .with("endpoint", spec.base_url_or_default())
            .with("model", spec.model.as_str())
            .with("temperature", spec.temperature)
            .with("max_tokens", spec.max_tokens)
            .with("audience", ctx.config.audience.as_str())
            .with("output_kind", state.output_kind.as_str())
            .with("content_type", content_type);
        (Fingerprint::compute(raw, &params), params)
    }

    fn cached(ctx: &ExecCtx, key: &Fingerprint) -> Option<StructuredContent> {
        let entry = ctx.cache.get(key)?;
        match entry.artifact {
            CachedArtifact::Inline(value) => match serde_json::from_value(value) {
                Ok(content) => Some(content),
                Err(e) => {
                    tracing::warn!(fingerprint = %key.short(), error = %e, "unreadable cached structure, regenerating");
                    None
                }
            },
            CachedArtifact::Location(_) => None,
        }
    }

    async fn apply(&self, ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        let raw = state
            .raw_text
            .as_deref()
            .ok_or_else(|| PipelineError::Other("transform ran before parse".into()))?;
        let content_type = content_type_hint(state.input_kind, raw);
        let (key, params) = Self::cache_key(ctx, state, raw, content_type);

        if let Some(content) = Self::cached(ctx, &key) {
            tracing::info!(fingerprint = %key.short(), sections = content.sections.len(), "structure cache hit");
            emit(
                &ctx.event_handler,
                Event::CacheHit {
                    scope: CacheScope::Structure,
                    fingerprint: key.to_string(),
                },
            );
            state.content = Some(content);
            return Ok(());
        }
        emit(
            &ctx.event_handler,
            Event::CacheMiss {
                scope: CacheScope::Structure,
                fingerprint: key.to_string(),
            },
        );

        let spec = &ctx.providers.text_spec;
        let request = GenerationRequest::new(
            spec.model.clone(),
            prompt::structure_prompt(raw, content_type, &ctx.config.audience, state.output_kind),
        )
        .with_system_prompt(STRUCTURE_SYSTEM_PROMPT)
        .with_params(GenerationParams {
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
            json_mode: true,
            size: None,
        });

        let text = ctx.providers.text.generate_text(&request).await?.into_text()?;
        let content = parse_structured(&text)?;
        tracing::info!(
            title = %content.title,
            sections = content.sections.len(),
            content_type,
            "content structured"
        );

        state.pending_cache_writes.push(PendingWrite {
            key,
            artifact: CachedArtifact::Inline(serde_json::to_value(&content)?),
            params,
        });
        state.content = Some(content);
        Ok(())
    }
}

impl Stage for Transform {
    fn name(&self) -> StageName {
        StageName::Transform
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
    use crate::backend::mock::MockFailure;
    use crate::backend::MockProvider;
    use crate::stage::StageOutcome;
    use crate::stages::test_support::{rig, rig_with, run_committed, DOC_JSON};
    use crate::types::{InputRef, OutputKind};

    fn parsed_state(text: &str) -> WorkflowState {
        let mut state = WorkflowState::new(InputRef::inline(text), OutputKind::Markdown);
        state.input_kind = Some(InputKind::Text);
        state.raw_text = Some(text.to_string());
        state
    }

    #[test]
    fn test_content_type_hint() {
        let transcript: String = (0..12).map(|i| format!("0{}:1{}\nline {}\n", i % 10, i % 10, i)).collect();
        assert_eq!(content_type_hint(Some(InputKind::Text), &transcript), "transcript");
        assert_eq!(content_type_hint(Some(InputKind::Pdf), "page one"), "slides");
        assert_eq!(content_type_hint(Some(InputKind::Markdown), "# hi"), "document");
    }

    #[tokio::test]
    async fn test_structures_and_caches() {
        let rig = rig();
        let first = run_committed(&Transform, &rig.ctx, parsed_state("Raw notes")).await;
        assert!(first.is_success());
        let content = first.state.content.unwrap();
        assert_eq!(content.title, "Ownership in Rust");
        assert_eq!(content.sections.len(), 2);

        let second = run_committed(&Transform, &rig.ctx, parsed_state("Raw notes")).await;
        assert_eq!(second.state.content.unwrap(), content);
        assert_eq!(rig.text.text_calls(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_changes_share_a_key() {
        let rig = rig();
        run_committed(&Transform, &rig.ctx, parsed_state("Raw notes\r\n\r\n\r\n")).await;
        run_committed(&Transform, &rig.ctx, parsed_state("Raw notes")).await;
        assert_eq!(rig.text.text_calls(), 1);
    }

    #[tokio::test]
    async fn test_audience_changes_key() {
        let shared = rig();
        let other = rig_with(MockProvider::fixed(DOC_JSON), MockProvider::fixed("x"), |c| {
            c.audience = "executive".into()
        });
        let (a, _) = Transform::cache_key(&shared.ctx, &parsed_state("n"), "n", "document");
        let (b, _) = Transform::cache_key(&other.ctx, &parsed_state("n"), "n", "document");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_result_is_held_until_committed() {
        let rig = rig();
        let result = Transform.run(&rig.ctx, parsed_state("Raw notes")).await;
        assert!(result.is_success());
        assert_eq!(result.state.pending_cache_writes.len(), 1);
        assert_eq!(rig.ctx.cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_endpoint_changes_key() {
        let local = rig();
        let mut remote = rig();
        remote.ctx.providers.text_spec = remote
            .ctx
            .providers
            .text_spec
            .clone()
            .with_base_url("http://gpu-box:11434");
        let (a, _) = Transform::cache_key(&local.ctx, &parsed_state("n"), "n", "document");
        let (b, _) = Transform::cache_key(&remote.ctx, &parsed_state("n"), "n", "document");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_provider_failure_is_classified() {
        let rig = rig_with(
            MockProvider::fixed(DOC_JSON).fail_text(MockFailure::Overloaded),
            MockProvider::fixed("x"),
            |_| {},
        );
        let result = Transform.run(&rig.ctx, parsed_state("Raw notes")).await;
        assert_eq!(result.outcome, StageOutcome::RetryableFailure);
        assert!(result.state.content.is_none());
        assert_eq!(rig.ctx.cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_malformed_output_is_terminal() {
        let rig = rig_with(MockProvider::fixed("I cannot help with that."), MockProvider::fixed("x"), |_| {});
        let result = Transform.run(&rig.ctx, parsed_state("Raw notes")).await;
        assert_eq!(result.outcome, StageOutcome::TerminalFailure);
    }
}
