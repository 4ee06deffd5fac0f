//! Generation provider interface and normalized request/result types.
//!
//! The [`Provider`] trait abstracts over text and image generation backends,
//! translating between the normalized [`GenerationRequest`]/[`GenerationResult`]
//! types and provider-specific HTTP APIs. Every failure comes back as a typed
//! [`PipelineError`] so the retry controller never sees backend-specific errors.
//!
//! ## Architecture
//!
//! ```text
//! stage ──► GenerationRequest ──► RateLimitedProvider ──► Provider::generate_*() ──► GenerationResult
//!                                        │                         │
//!                                 RateLimiter::acquire   ┌─────────┴─────────┐
//!                                                   OllamaProvider     OpenAiProvider
//!                                                   /api/generate      /v1/chat/completions
//!                                                                      /v1/images/generations
//! ```
//!
//! Which provider answers text and which answers images is decided once,
//! when [`Providers`] is built from configuration.

pub mod backoff;
pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use backoff::BackoffConfig;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

use crate::config::ProviderSpec;
use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Tunable generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: f64,

    /// Maximum tokens to generate (text only).
    pub max_tokens: u32,

    /// Ask the backend for a JSON object (text only).
    pub json_mode: bool,

    /// Image dimensions, e.g. `"1024x1024"` (images only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            json_mode: false,
            size: None,
        }
    }
}

/// A normalized generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier (e.g. `"llama3.2:3b"`, `"gpt-4o-mini"`, `"dall-e-3"`).
    pub model: String,

    /// Optional system instructions (text only).
    pub system_prompt: Option<String>,

    /// The user prompt, or the image description.
    pub prompt: String,

    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// A generated image as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// Inline image bytes, base64-encoded.
    Base64 { data: String, mime: String },
    /// Image hosted by the provider.
    Url(String),
}

/// What the backend produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedPayload {
    Text(String),
    Image(ImageData),
}

/// Provider-reported token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A normalized generation result.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub payload: GeneratedPayload,

    pub usage: Usage,

    /// False when the backend answered but declined to produce content
    /// (e.g. a content filter).
    pub success: bool,
}

impl GenerationResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: GeneratedPayload::Text(text.into()),
            usage: Usage::default(),
            success: true,
        }
    }

    pub fn image(image: ImageData) -> Self {
        Self {
            payload: GeneratedPayload::Image(image),
            usage: Usage::default(),
            success: true,
        }
    }

    /// Extract the text payload, failing on refusals or an image payload.
    pub fn into_text(self) -> Result<String> {
        match (self.success, self.payload) {
            (true, GeneratedPayload::Text(t)) => Ok(t),
            (false, _) => Err(PipelineError::MalformedOutput(
                "provider declined to produce text".into(),
            )),
            (true, GeneratedPayload::Image(_)) => Err(PipelineError::MalformedOutput(
                "expected text, provider returned an image".into(),
            )),
        }
    }

    /// Extract the image payload, failing on refusals or a text payload.
    pub fn into_image(self) -> Result<ImageData> {
        match (self.success, self.payload) {
            (true, GeneratedPayload::Image(i)) => Ok(i),
            (false, _) => Err(PipelineError::MalformedOutput(
                "provider declined to produce an image".into(),
            )),
            (true, GeneratedPayload::Text(_)) => Err(PipelineError::MalformedOutput(
                "expected an image, provider returned text".into(),
            )),
        }
    }
}

/// Abstraction over generation backends.
///
/// Implementors translate between the normalized request/result types and the
/// backend's API, and map every failure onto a typed [`PipelineError`].
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used for rate limiting, logging, and fingerprints.
    fn id(&self) -> &str;

    /// Produce text from a structured prompt.
    async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Produce an image from a prompt. Text-only providers keep the default.
    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let _ = request;
        Err(PipelineError::InvalidConfig(format!(
            "provider '{}' cannot generate images",
            self.id()
        )))
    }
}

/// Closed set of built-in backends selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider that waits on the shared [`RateLimiter`] before every call.
///
/// The limiter is keyed by the inner provider's [`id`](Provider::id), so two
/// wrappers around the same backend share one budget.
pub struct RateLimitedProvider {
    inner: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn Provider>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl Provider for RateLimitedProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.limiter.acquire(self.inner.id()).await;
        self.inner.generate_text(request).await
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.limiter.acquire(self.inner.id()).await;
        self.inner.generate_image(request).await
    }
}

/// The text and image providers for a pipeline, plus their model settings.
#[derive(Clone)]
pub struct Providers {
    pub text: Arc<dyn Provider>,
    pub text_spec: ProviderSpec,
    pub image: Arc<dyn Provider>,
    pub image_spec: ProviderSpec,
}

impl Providers {
    /// Use explicit provider instances (e.g. mocks) with their specs.
    pub fn new(
        text: Arc<dyn Provider>,
        text_spec: ProviderSpec,
        image: Arc<dyn Provider>,
        image_spec: ProviderSpec,
    ) -> Self {
        Self {
            text,
            text_spec,
            image,
            image_spec,
        }
    }

    /// Build the configured backends, each wrapped in the shared limiter.
    pub fn from_specs(
        client: &Client,
        text_spec: &ProviderSpec,
        image_spec: &ProviderSpec,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let text = build_provider(client, text_spec)?;
        let image = build_provider(client, image_spec)?;
        Ok(Self {
            text: Arc::new(RateLimitedProvider::new(text, limiter.clone())),
            text_spec: text_spec.clone(),
            image: Arc::new(RateLimitedProvider::new(image, limiter)),
            image_spec: image_spec.clone(),
        })
    }

    /// Wrap both providers in `limiter`.
    pub fn rate_limited(self, limiter: Arc<RateLimiter>) -> Self {
        Self {
            text: Arc::new(RateLimitedProvider::new(self.text, limiter.clone())),
            text_spec: self.text_spec,
            image: Arc::new(RateLimitedProvider::new(self.image, limiter)),
            image_spec: self.image_spec,
        }
    }
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("text", &self.text.id())
            .field("text_model", &self.text_spec.model)
            .field("image", &self.image.id())
            .field("image_model", &self.image_spec.model)
            .finish()
    }
}

/// Construct the backend named by `spec`.
pub fn build_provider(client: &Client, spec: &ProviderSpec) -> Result<Arc<dyn Provider>> {
    match spec.provider {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(
            client.clone(),
            spec.base_url_or_default(),
        ))),
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => {
            let mut provider = OpenAiProvider::new(client.clone(), spec.base_url_or_default());
            if let Some(key) = spec.api_key()? {
                provider = provider.with_api_key(key);
            }
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "openai"))]
        ProviderKind::OpenAi => Err(PipelineError::InvalidConfig(
            "the 'openai' feature is disabled".into(),
        )),
    }
}

/// Parse a `Retry-After` header value as seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a non-success HTTP response onto the error taxonomy.
pub(crate) fn map_http_error(
    provider: &str,
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> PipelineError {
    match status.as_u16() {
        401 | 403 => PipelineError::Authentication {
            provider: provider.to_string(),
            message: body,
        },
        429 => PipelineError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        500 | 502 | 503 | 529 => PipelineError::Overloaded {
            provider: provider.to_string(),
            message: format!("HTTP {}: {}", status.as_u16(), body),
        },
        code => PipelineError::HttpError {
            status: code,
            body,
            retry_after,
        },
    }
}

/// Map a transport failure onto the error taxonomy.
pub(crate) fn map_transport_error(provider: &str, err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        PipelineError::Request(err)
    }
}

/// Send a JSON POST and return the decoded body, mapping every failure.
pub(crate) async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let resp = request
        .send()
        .await
        .map_err(|e| map_transport_error(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = resp.text().await.unwrap_or_default();
        return Err(map_http_error(provider, status, text, retry_after));
    }

    resp.json()
        .await
        .map_err(|e| PipelineError::MalformedOutput(format!("{} returned invalid JSON: {}", provider, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_http_error_auth() {
        let err = map_http_error("openai", StatusCode::UNAUTHORIZED, "nope".into(), None);
        assert!(matches!(err, PipelineError::Authentication { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit_keeps_hint() {
        let err = map_http_error(
            "openai",
            StatusCode::TOO_MANY_REQUESTS,
            "slow down".into(),
            Some(Duration::from_secs(20)),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
        assert!(matches!(err, PipelineError::RateLimited { .. }));
    }

    #[test]
    fn test_map_http_error_overload() {
        let err = map_http_error("ollama", StatusCode::SERVICE_UNAVAILABLE, "busy".into(), None);
        assert!(matches!(err, PipelineError::Overloaded { .. }));
    }

    #[test]
    fn test_map_http_error_other_status() {
        let err = map_http_error("ollama", StatusCode::BAD_REQUEST, "bad".into(), None);
        assert!(matches!(err, PipelineError::HttpError { status: 400, .. }));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_into_text_rejects_refusal() {
        let mut result = GenerationResult::text("hi");
        result.success = false;
        assert!(matches!(
            result.into_text(),
            Err(PipelineError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_into_image_rejects_text() {
        let result = GenerationResult::text("not an image");
        assert!(result.into_image().is_err());
    }

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn id(&self) -> &str {
            "echo"
        }

        async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult> {
            Ok(GenerationResult::text(request.prompt.clone()))
        }
    }

    #[tokio::test]
    async fn test_text_only_provider_rejects_images() {
        let provider: Arc<dyn Provider> = Arc::new(EchoProvider);
        let err = provider
            .generate_image(&GenerationRequest::new("m", "a cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref m) if m.contains("'echo'")));
    }

    #[tokio::test]
    async fn test_rate_limited_provider_forwards() {
        let limiter = Arc::new(RateLimiter::unlimited());
        let inner: Arc<dyn Provider> = Arc::new(MockProvider::text(vec!["ok".into()]));
        let wrapped = RateLimitedProvider::new(inner, limiter);
        let out = wrapped
            .generate_text(&GenerationRequest::new("m", "p"))
            .await
            .unwrap();
        assert_eq!(out.into_text().unwrap(), "ok");
        assert_eq!(wrapped.id(), "mock");
    }
}
