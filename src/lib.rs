//! # Doc Pipeline
//!
//! A retryable, cache-aware workflow engine that turns source documents
//! (Markdown, plain text, web pages, and PDFs through a pluggable resolver)
//! into rendered artifacts by way of LLM restructuring and generated imagery.
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`]** runs six stages in a fixed order, `detect-kind → parse →
//!   transform → generate-images → render → validate`, then loops back to
//!   `render` while the error is retryable and attempts remain.
//! - **[`WorkflowState`]** is the record threaded through the stages. A
//!   stage takes it by value and hands it back inside a
//!   [`StageResult`](stage::StageResult).
//! - **[`ContentCache`](cache::ContentCache)** maps a SHA-256 fingerprint of
//!   (content, generation parameters) to a previous result. Both the
//!   structuring call and every per-section image call go through it.
//! - **[`Provider`](backend::Provider)** is the single surface for text and
//!   image generation. Every call waits on the shared
//!   [`RateLimiter`](rate_limit::RateLimiter) first.
//! - **[`ExecCtx`]** bundles configuration, providers, cache, limiter,
//!   resolvers, renderers, cancellation and the optional
//!   [`EventHandler`](events::EventHandler).
//!
//! ## Quick Start
//!
//! ```no_run
//! use doc_pipeline::{ExecCtx, InputRef, OutputKind, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_path("pipeline.json")?;
//!     let ctx = ExecCtx::builder(config).build()?;
//!     let pipeline = Pipeline::builder(ctx).build();
//!
//!     let artifact = pipeline
//!         .execute(InputRef::path("notes.md"), OutputKind::Markdown)
//!         .await
//!         .into_result()?;
//!     println!("wrote {}", artifact.path.display());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod parsing;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod renderer;
pub mod resolve;
pub mod retry;
pub mod stage;
pub mod stages;
pub mod types;

pub use backend::{
    BackoffConfig, GenerationRequest, GenerationResult, MockProvider, OllamaProvider, Provider,
    ProviderKind, Providers,
};
#[cfg(feature = "openai")]
pub use backend::OpenAiProvider;
pub use cache::{ContentCache, Fingerprint, FingerprintParams};
pub use config::{PipelineConfig, ProviderSpec, RateLimitSpec};
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, EventLog, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use pipeline::{Pipeline, PipelineBuilder, RunReport, RunStatus};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use renderer::{MarkdownRenderer, Renderer};
pub use resolve::InputResolver;
pub use retry::{classify, ErrorClass, RetryDecision, RetryPolicy};
pub use stage::{BoxFut, Stage, StageName, StageOutcome, StageResult};
pub use types::{
    ArtifactRef, ImageRef, InputKind, InputRef, OutputKind, Section, StageError,
    StructuredContent, WorkflowState,
};
