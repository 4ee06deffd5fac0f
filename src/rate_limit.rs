//! Per-provider call throttling.
//!
//! [`RateLimiter::acquire`] suspends the caller until the named provider has
//! a free slot. Each provider gets a `governor` quota of `max_calls` per
//! `per`, replenished evenly, plus a second quota that keeps consecutive
//! calls at least `min_interval` apart.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};

/// Call budget for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Calls allowed per window.
    pub max_calls: u32,

    /// Window length.
    pub per: Duration,

    /// Minimum gap between two consecutive calls.
    pub min_interval: Duration,
}

impl RateLimitConfig {
    /// `calls` per minute, spaced at least `60s / calls` apart.
    pub fn per_minute(calls: u32) -> Self {
        let calls = calls.max(1);
        Self {
            max_calls: calls,
            per: Duration::from_secs(60),
            min_interval: Duration::from_secs(60) / calls,
        }
    }

    /// Override the minimum gap. Zero keeps the gap implied by the window.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        if !min_interval.is_zero() {
            self.min_interval = min_interval;
        }
        self
    }

    /// Window quota: bursts of up to `max_calls`, one cell back every
    /// `per / max_calls`.
    fn window_quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.max_calls)?;
        Quota::with_period(self.per / burst.get()).map(|q| q.allow_burst(burst))
    }

    fn spacing_quota(&self) -> Option<Quota> {
        Quota::with_period(self.min_interval)
    }
}

/// The governors guarding one provider.
struct ProviderGate {
    config: RateLimitConfig,
    window: Option<DefaultDirectRateLimiter>,
    spacing: Option<DefaultDirectRateLimiter>,
}

impl ProviderGate {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: config.window_quota().map(Governor::direct),
            spacing: config.spacing_quota().map(Governor::direct),
        }
    }
}

/// Shared throttle keyed by provider id.
///
/// Providers without a configured budget pass straight through. One instance
/// is shared by every request and every image worker.
///
/// # Example
///
/// ```
/// use doc_pipeline::rate_limit::{RateLimiter, RateLimitConfig};
///
/// # tokio_test::block_on(async {
/// let limiter = RateLimiter::new().with_limit("openai", RateLimitConfig::per_minute(60));
/// limiter.acquire("openai").await;
/// limiter.acquire("ollama").await; // unlimited
/// # });
/// ```
#[derive(Default)]
pub struct RateLimiter {
    gates: HashMap<String, ProviderGate>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limits: HashMap<&str, &RateLimitConfig> = self
            .gates
            .iter()
            .map(|(provider, gate)| (provider.as_str(), &gate.config))
            .collect();
        f.debug_struct("RateLimiter").field("limits", &limits).finish()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Build from `provider id -> budget` pairs.
    pub fn from_configs(configs: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            gates: configs
                .into_iter()
                .map(|(provider, config)| (provider, ProviderGate::new(config)))
                .collect(),
        }
    }

    pub fn with_limit(mut self, provider: impl Into<String>, config: RateLimitConfig) -> Self {
        self.gates.insert(provider.into(), ProviderGate::new(config));
        self
    }

    /// Budget for `provider`, if any.
    pub fn limit_for(&self, provider: &str) -> Option<&RateLimitConfig> {
        self.gates.get(provider).map(|gate| &gate.config)
    }

    /// Wait until `provider` has a free slot, then claim it.
    pub async fn acquire(&self, provider: &str) {
        let Some(gate) = self.gates.get(provider) else {
            return;
        };
        for limiter in [&gate.spacing, &gate.window].into_iter().flatten() {
            if limiter.check().is_err() {
                tracing::debug!(provider = provider, "rate limit reached, waiting");
                limiter.until_ready().await;
            }
        }
    }
}
