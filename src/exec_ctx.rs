//! Execution context shared by every stage of every request.
//!
//! [`ExecCtx`] carries the configuration, the text and image providers, the
//! content cache, the rate limiter, the registered resolvers and renderers,
//! the cancellation handle, and the optional event handler. It is built once
//! and shared; the cache and limiter inside it are the only state concurrent
//! requests have in common.

use crate::backend::Providers;
use crate::cache::{ContentCache, FileStore, MemoryStore};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::EventHandler;
use crate::rate_limit::RateLimiter;
use crate::renderer::{MarkdownRenderer, Renderer};
use crate::resolve::{InlineTextResolver, InputResolver, TextFileResolver, WebResolver};
use crate::types::{InputKind, InputRef, OutputKind};
use reqwest::Client;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Shared execution context for pipeline runs.
///
/// # Example
///
/// ```
/// use doc_pipeline::{ExecCtx, PipelineConfig};
///
/// let ctx = ExecCtx::builder(PipelineConfig::default())
///     .timeout(std::time::Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(ctx.config.max_attempts, 3);
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally).
    pub client: Client,
    pub config: PipelineConfig,
    /// Text and image providers, already wrapped in `limiter`.
    pub providers: Providers,
    pub cache: Arc<ContentCache>,
    pub limiter: Arc<RateLimiter>,
    pub resolvers: Vec<Arc<dyn InputResolver>>,
    pub renderers: Vec<Arc<dyn Renderer>>,
    /// Optional cancellation flag, checked at every stage boundary.
    pub cancellation: Option<Arc<AtomicBool>>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    pub fn builder(config: PipelineConfig) -> ExecCtxBuilder {
        ExecCtxBuilder {
            config,
            client: None,
            providers: None,
            cache: None,
            limiter: None,
            resolvers: Vec::new(),
            renderers: Vec::new(),
            builtins: true,
            cancellation: None,
            event_handler: None,
            timeout: None,
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(crate::PipelineError::Cancelled);
        }
        Ok(())
    }

    /// First resolver that accepts `input` as `kind`. Later registrations win.
    pub fn resolver_for(&self, kind: InputKind, input: &InputRef) -> Option<&Arc<dyn InputResolver>> {
        self.resolvers.iter().rev().find(|r| r.accepts(kind, input))
    }

    /// First renderer that supports `kind`. Later registrations win.
    pub fn renderer_for(&self, kind: OutputKind) -> Option<&Arc<dyn Renderer>> {
        self.renderers.iter().rev().find(|r| r.supports(kind))
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("providers", &self.providers)
            .field("cache", &self.cache)
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "renderers",
                &self.renderers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    config: PipelineConfig,
    client: Option<Client>,
    providers: Option<Providers>,
    cache: Option<Arc<ContentCache>>,
    limiter: Option<Arc<RateLimiter>>,
    resolvers: Vec<Arc<dyn InputResolver>>,
    renderers: Vec<Arc<dyn Renderer>>,
    builtins: bool,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Use these providers instead of building them from the config.
    ///
    /// They are still wrapped in the rate limiter.
    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Share a cache between contexts. Default: built from `cache_dir`.
    pub fn cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share a limiter between contexts. Default: built from `rate_limits`.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Register an input resolver. Takes precedence over earlier ones.
    pub fn resolver(mut self, resolver: Arc<dyn InputResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Register a renderer. Takes precedence over earlier ones.
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    /// Skip the built-in resolvers and renderer.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Set the cancellation flag.
    pub fn cancellation(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = cancel;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the request timeout. Default: 120 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the config and build the context.
    pub fn build(self) -> Result<ExecCtx> {
        self.config.validate()?;

        let client = match self.client {
            Some(c) => c,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(120)))
                .build()?,
        };

        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::from_configs(self.config.rate_limit_configs())));

        let providers = match self.providers {
            Some(p) => p.rate_limited(limiter.clone()),
            None => Providers::from_specs(
                &client,
                &self.config.text_provider,
                &self.config.image_provider,
                limiter.clone(),
            )?,
        };

        let cache = match self.cache {
            Some(c) => c,
            None => {
                let cache = match self.config.cache_dir {
                    Some(ref dir) => ContentCache::new(Arc::new(FileStore::open(dir)?)),
                    None => ContentCache::new(Arc::new(MemoryStore::new())),
                };
                Arc::new(cache.with_ttl(self.config.cache_ttl()))
            }
        };

        let mut resolvers: Vec<Arc<dyn InputResolver>> = Vec::new();
        let mut renderers: Vec<Arc<dyn Renderer>> = Vec::new();
        if self.builtins {
            resolvers.push(Arc::new(TextFileResolver));
            resolvers.push(Arc::new(InlineTextResolver));
            resolvers.push(Arc::new(WebResolver::new(client.clone())));
            renderers.push(Arc::new(MarkdownRenderer));
        }
        resolvers.extend(self.resolvers);
        renderers.extend(self.renderers);

        Ok(ExecCtx {
            client,
            config: self.config,
            providers,
            cache,
            limiter,
            resolvers,
            renderers,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        })
    }
}
