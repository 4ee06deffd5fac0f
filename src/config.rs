//! Pipeline configuration.
//!
//! [`PipelineConfig`] is plain serde data with a default for every field, so a
//! config file only needs the keys it wants to change. JSON is always
//! supported; YAML needs the `yaml` feature.

use crate::backend::ProviderKind;
use crate::error::Result;
use crate::rate_limit::RateLimitConfig;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cache entry lifetime: 24 hours.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 86_400;

/// Which backend answers a capability, and how it is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: ProviderKind,

    pub model: String,

    /// Override the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Image dimensions for image providers, e.g. `"1024x1024"`.
    #[serde(default)]
    pub image_size: Option<String>,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl ProviderSpec {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            image_size: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Endpoint to use: the override, or the provider's well-known default.
    pub fn base_url_or_default(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.clone();
        }
        match self.provider {
            ProviderKind::Ollama => crate::backend::ollama::DEFAULT_OLLAMA_URL.to_string(),
            ProviderKind::OpenAi => "https://api.openai.com".to_string(),
        }
    }

    /// Read the API key from the environment.
    ///
    /// An explicitly named variable must exist. Without one, OpenAI falls
    /// back to `OPENAI_API_KEY` if set.
    pub fn api_key(&self) -> Result<Option<String>> {
        match self.api_key_env {
            Some(ref var) => std::env::var(var).map(Some).map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "environment variable '{}' for provider '{}' is not set",
                    var, self.provider
                ))
            }),
            None if self.provider == ProviderKind::OpenAi => {
                Ok(std::env::var("OPENAI_API_KEY").ok())
            }
            None => Ok(None),
        }
    }
}

/// Per-provider call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub calls_per_minute: u32,

    /// Minimum gap between two calls, in milliseconds.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl RateLimitSpec {
    pub fn to_config(self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.calls_per_minute)
            .with_min_interval(Duration::from_millis(self.min_interval_ms))
    }
}

/// Everything the pipeline reads from configuration.
///
/// # Example
///
/// ```
/// use doc_pipeline::config::PipelineConfig;
///
/// let config = PipelineConfig::from_json_str(r#"{
///     "max_attempts": 5,
///     "rate_limits": { "openai": { "calls_per_minute": 20 } }
/// }"#).unwrap();
/// assert_eq!(config.max_attempts, 5);
/// assert_eq!(config.cache_ttl_seconds, 86_400);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts of the render/validate pair, including the first.
    pub max_attempts: u32,

    pub cache_ttl_seconds: u64,

    /// Keyed by provider id (`"ollama"`, `"openai"`, ...).
    pub rate_limits: HashMap<String, RateLimitSpec>,

    pub text_provider: ProviderSpec,

    pub image_provider: ProviderSpec,

    /// Concurrent per-section image calls.
    pub image_concurrency: usize,

    pub image_style: String,

    pub audience: String,

    pub enable_images: bool,

    /// Directory for the persisted cache. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,

    /// Where rendered artifacts and image assets are written.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            rate_limits: HashMap::new(),
            text_provider: ProviderSpec::new(ProviderKind::Ollama, "llama3.2:3b"),
            image_provider: ProviderSpec::new(ProviderKind::OpenAi, "dall-e-3"),
            image_concurrency: 4,
            image_style: "auto".to_string(),
            audience: "general".to_string(),
            enable_images: true,
            cache_dir: None,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML config.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(format!("YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, choosing the format by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            #[cfg(feature = "yaml")]
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            other => Err(PipelineError::InvalidConfig(format!(
                "unsupported config format: {:?}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.image_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "image_concurrency must be at least 1".into(),
            ));
        }
        for (name, spec) in [("text_provider", &self.text_provider), ("image_provider", &self.image_provider)] {
            if spec.model.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}.model cannot be empty",
                    name
                )));
            }
        }
        for (provider, limit) in &self.rate_limits {
            if limit.calls_per_minute == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "rate limit for '{}' must allow at least one call per minute",
                    provider
                )));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Rate limits keyed by provider id, ready for [`RateLimiter`](crate::rate_limit::RateLimiter).
    pub fn rate_limit_configs(&self) -> HashMap<String, RateLimitConfig> {
        self.rate_limits
            .iter()
            .map(|(k, v)| (k.clone(), v.to_config()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.image_concurrency, 4);
        assert!(config.enable_images);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "text_provider": { "provider": "openai", "model": "gpt-4o-mini", "temperature": 0.2 },
                "rate_limits": { "openai": { "calls_per_minute": 60, "min_interval_ms": 250 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.text_provider.provider, ProviderKind::OpenAi);
        assert_eq!(config.text_provider.temperature, 0.2);
        assert_eq!(config.text_provider.max_tokens, 4096);
        assert_eq!(config.max_attempts, 3);
        let limits = config.rate_limit_configs();
        assert_eq!(limits["openai"].min_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"max_attempts": 0}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let result = PipelineConfig::from_json_str(
            r#"{"rate_limits": {"ollama": {"calls_per_minute": 0}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_model_rejected() {
        let mut config = PipelineConfig::default();
        config.image_provider.model = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_named_key_env_is_error() {
        let mut spec = ProviderSpec::new(ProviderKind::OpenAi, "gpt-4o-mini");
        spec.api_key_env = Some("DOC_PIPELINE_TEST_KEY_THAT_DOES_NOT_EXIST".into());
        assert!(spec.api_key().is_err());
    }

    #[test]
    fn test_base_url_defaults() {
        let ollama = ProviderSpec::new(ProviderKind::Ollama, "m");
        assert_eq!(ollama.base_url_or_default(), "http://localhost:11434");
        let custom = ProviderSpec::new(ProviderKind::OpenAi, "m").with_base_url("http://vllm:8000");
        assert_eq!(custom.base_url_or_default(), "http://vllm:8000");
    }

    #[test]
    fn test_from_path_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"audience": "executives"}"#).unwrap();
        let config = PipelineConfig::from_path(&path).unwrap();
        assert_eq!(config.audience, "executives");
    }

    #[test]
    fn test_from_path_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(PipelineConfig::from_path(&path).is_err());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_yaml_config() {
        let config = PipelineConfig::from_yaml_str("max_attempts: 2\nimage_style: watercolor\n").unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.image_style, "watercolor");
    }
}
