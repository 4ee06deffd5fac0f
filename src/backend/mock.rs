//! Mock provider for testing without a live backend.
//!
//! [`MockProvider`] returns scripted replies in order, then falls back to
//! canned responses. It counts calls and records when they happened, so tests
//! can assert on cache hits and rate limiting.
//!
//! # Example
//!
//! ```
//! use doc_pipeline::backend::{MockProvider, mock::MockFailure};
//!
//! let mock = MockProvider::text(vec![r#"{"title": "T", "sections": []}"#.to_string()])
//!     .fail_text(MockFailure::Overloaded);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{GenerationRequest, GenerationResult, ImageData, Provider};
use crate::error::Result;
use crate::PipelineError;

/// A failure the mock can be scripted to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Overloaded,
    Timeout,
    RateLimited(Option<Duration>),
    Authentication,
    Malformed,
}

impl MockFailure {
    fn to_error(&self, provider: &str) -> PipelineError {
        match self {
            MockFailure::Overloaded => PipelineError::Overloaded {
                provider: provider.to_string(),
                message: "scripted overload".into(),
            },
            MockFailure::Timeout => PipelineError::Timeout {
                provider: provider.to_string(),
            },
            MockFailure::RateLimited(retry_after) => PipelineError::RateLimited {
                provider: provider.to_string(),
                retry_after: *retry_after,
            },
            MockFailure::Authentication => PipelineError::Authentication {
                provider: provider.to_string(),
                message: "scripted auth failure".into(),
            },
            MockFailure::Malformed => {
                PipelineError::MalformedOutput("scripted malformed output".into())
            }
        }
    }
}

enum Reply {
    Text(String),
    Image(ImageData),
    Fail(MockFailure),
}

/// A test provider with scripted replies and call accounting.
///
/// Scripted replies are consumed first-in first-out. Once a script is empty,
/// text calls cycle through the canned responses and image calls return
/// `mock://image/<n>` URLs.
pub struct MockProvider {
    id: String,
    responses: Vec<String>,
    index: AtomicUsize,
    text_script: Mutex<VecDeque<Reply>>,
    image_script: Mutex<VecDeque<Reply>>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    prompts: Mutex<Vec<String>>,
    latency: Duration,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("id", &self.id)
            .field("responses", &self.responses.len())
            .field("text_calls", &self.text_calls())
            .field("image_calls", &self.image_calls())
            .finish()
    }
}

impl MockProvider {
    /// Create a mock whose text calls cycle through `responses`.
    pub fn text(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "MockProvider requires at least one response");
        Self {
            id: "mock".to_string(),
            responses,
            index: AtomicUsize::new(0),
            text_script: Mutex::new(VecDeque::new()),
            image_script: Mutex::new(VecDeque::new()),
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Create a mock that always answers text calls with `response`.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::text(vec![response.into()])
    }

    /// Change the provider id (which is also the rate-limit key).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script the next unscripted text call to fail.
    pub fn fail_text(self, failure: MockFailure) -> Self {
        push(&self.text_script, Reply::Fail(failure));
        self
    }

    /// Script the next unscripted text call to return `text`.
    pub fn then_text(self, text: impl Into<String>) -> Self {
        push(&self.text_script, Reply::Text(text.into()));
        self
    }

    /// Script the next unscripted image call to fail.
    pub fn fail_image(self, failure: MockFailure) -> Self {
        push(&self.image_script, Reply::Fail(failure));
        self
    }

    /// Script the next unscripted image call to return `image`.
    pub fn then_image(self, image: ImageData) -> Self {
        push(&self.image_script, Reply::Image(image));
        self
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Total calls of either kind.
    pub fn calls(&self) -> usize {
        self.text_calls() + self.image_calls()
    }

    /// When each call started, in arrival order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Prompts received, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, request: &GenerationRequest) {
        if let Ok(mut times) = self.call_times.lock() {
            times.push(Instant::now());
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
    }

    fn next_response(&self) -> String {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        self.responses[idx].clone()
    }
}

fn push(script: &Mutex<VecDeque<Reply>>, reply: Reply) {
    if let Ok(mut s) = script.lock() {
        s.push_back(reply);
    }
}

fn pop(script: &Mutex<VecDeque<Reply>>) -> Option<Reply> {
    script.lock().ok().and_then(|mut s| s.pop_front())
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.record(request);
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match pop(&self.text_script) {
            Some(Reply::Fail(f)) => Err(f.to_error(&self.id)),
            Some(Reply::Text(t)) => Ok(GenerationResult::text(t)),
            Some(Reply::Image(i)) => Ok(GenerationResult::image(i)),
            None => Ok(GenerationResult::text(self.next_response())),
        }
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.record(request);
        let n = self.image_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match pop(&self.image_script) {
            Some(Reply::Fail(f)) => Err(f.to_error(&self.id)),
            Some(Reply::Image(i)) => Ok(GenerationResult::image(i)),
            Some(Reply::Text(t)) => Ok(GenerationResult::text(t)),
            None => Ok(GenerationResult::image(ImageData::Url(format!(
                "mock://image/{}",
                n
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("test", "prompt")
    }

    #[tokio::test]
    async fn test_mock_fixed_response() {
        let mock = MockProvider::fixed("Hello!");
        let resp = mock.generate_text(&request()).await.unwrap();
        assert_eq!(resp.into_text().unwrap(), "Hello!");
        assert_eq!(mock.text_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockProvider::text(vec!["first".into(), "second".into()]);
        let r1 = mock.generate_text(&request()).await.unwrap().into_text().unwrap();
        let r2 = mock.generate_text(&request()).await.unwrap().into_text().unwrap();
        let r3 = mock.generate_text(&request()).await.unwrap().into_text().unwrap();
        assert_eq!(r1, "first");
        assert_eq!(r2, "second");
        assert_eq!(r3, "first");
    }

    #[tokio::test]
    async fn test_mock_script_runs_before_fallback() {
        let mock = MockProvider::fixed("fallback")
            .fail_text(MockFailure::Overloaded)
            .then_text("scripted");

        let first = mock.generate_text(&request()).await;
        assert!(matches!(first, Err(PipelineError::Overloaded { .. })));
        let second = mock.generate_text(&request()).await.unwrap();
        assert_eq!(second.into_text().unwrap(), "scripted");
        let third = mock.generate_text(&request()).await.unwrap();
        assert_eq!(third.into_text().unwrap(), "fallback");
        assert_eq!(mock.text_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_images_default_to_urls() {
        let mock = MockProvider::fixed("x").with_id("images");
        let img = mock.generate_image(&request()).await.unwrap().into_image().unwrap();
        assert_eq!(img, ImageData::Url("mock://image/0".into()));
        assert_eq!(mock.image_calls(), 1);
        assert_eq!(mock.id(), "images");
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let mock = MockProvider::fixed("x");
        mock.generate_text(&GenerationRequest::new("m", "one")).await.unwrap();
        mock.generate_image(&GenerationRequest::new("m", "two")).await.unwrap();
        assert_eq!(mock.prompts(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(mock.call_times().len(), 2);
    }
}
