use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline and its components.
///
/// Variants are grouped the way the retry controller sees them: input
/// problems, backend conditions, produced-artifact problems, and local
/// plumbing. See [`crate::retry::classify`] for which of these are retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The input kind is not supported or no resolver handles it.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The input could not be read or is corrupt.
    #[error("Input unavailable: {0}")]
    InputUnavailable(String),

    /// The provider rejected the credentials.
    #[error("Authentication failed for provider '{provider}': {message}")]
    Authentication { provider: String, message: String },

    /// The call did not complete within the transport timeout.
    #[error("Request to provider '{provider}' timed out")]
    Timeout { provider: String },

    /// The backend reported it is overloaded or temporarily failing.
    #[error("Provider '{provider}' overloaded: {message}")]
    Overloaded { provider: String, message: String },

    /// The backend rejected the call because of its rate limit.
    ///
    /// `retry_after` carries the backend's cool-down hint when it sent one.
    #[error("Provider '{provider}' rate limited the request")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Providers map the statuses they understand onto the typed variants
    /// above; this variant carries everything else.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Low-level HTTP transport failure (connection refused, reset, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The model answered, but not in a shape the pipeline can use.
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    /// The produced artifact is missing, empty, or malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The renderer failed to produce an artifact.
    #[error("Render failed: {0}")]
    Render(String),

    /// The persisted cache store could not be reached.
    #[error("Cache store error: {0}")]
    Cache(String),

    /// The request was cancelled at a stage boundary.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// The run ended in the failed state.
    ///
    /// Carries the final attempt's error detail and how many attempts were made.
    #[error("Pipeline failed after {attempts} attempt(s): {message}")]
    RunFailed { attempts: u32, message: String },

    /// Invalid configuration detected at load or build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Backend-supplied cool-down hint, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::RateLimited { retry_after, .. }
            | PipelineError::HttpError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_from_rate_limited() {
        let err = PipelineError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_after_absent_for_other_variants() {
        assert_eq!(PipelineError::Cancelled.retry_after(), None);
        assert_eq!(
            PipelineError::Validation("empty".into()).retry_after(),
            None
        );
    }

    #[test]
    fn test_anyhow_converts_to_other() {
        let err: PipelineError = anyhow::anyhow!("renderer exploded").into();
        assert!(matches!(err, PipelineError::Other(ref m) if m == "renderer exploded"));
    }
}
