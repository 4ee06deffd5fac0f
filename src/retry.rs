//! Error classification and the attempt budget.
//!
//! [`classify`] sorts every [`PipelineError`] into [`ErrorClass::Retryable`]
//! (transient backend conditions, render and validation failures) or
//! [`ErrorClass::Terminal`] (bad input, credentials, unusable model output,
//! anything unrecognised). [`RetryPolicy`] combines that with the attempt
//! counter on a [`WorkflowState`] to decide whether the engine loops back to
//! the render stage, and how long it pauses first.

use crate::backend::BackoffConfig;
use crate::error::PipelineError;
use crate::types::WorkflowState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default number of attempts of the render/validate pair.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cool-down used after a rate-limit rejection that carried no hint.
pub const DEFAULT_RATE_LIMIT_COOL_DOWN: Duration = Duration::from_secs(30);

/// Whether an error may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => f.write_str("retryable"),
            ErrorClass::Terminal => f.write_str("terminal"),
        }
    }
}

/// Classify an error as retryable or terminal.
///
/// Retryable: timeouts, overload, rate limiting, 408/429/5xx, transport
/// failures, render and validation failures, cache-store failures.
/// Terminal: unsupported or corrupt input, authentication, malformed model
/// output, cancellation, configuration, and everything unrecognised.
pub fn classify(error: &PipelineError) -> ErrorClass {
    use ErrorClass::*;
    match error {
        PipelineError::Timeout { .. }
        | PipelineError::Overloaded { .. }
        | PipelineError::RateLimited { .. }
        | PipelineError::Validation(_)
        | PipelineError::Render(_)
        | PipelineError::Cache(_) => Retryable,
        PipelineError::HttpError { status, .. } => match status {
            401 | 403 => Terminal,
            408 | 429 => Retryable,
            s if *s >= 500 => Retryable,
            _ => Terminal,
        },
        PipelineError::Request(e) => {
            if e.is_decode() || e.is_builder() {
                Terminal
            } else {
                Retryable
            }
        }
        PipelineError::UnsupportedInput(_)
        | PipelineError::InputUnavailable(_)
        | PipelineError::Authentication { .. }
        | PipelineError::MalformedOutput(_)
        | PipelineError::Cancelled
        | PipelineError::RunFailed { .. }
        | PipelineError::InvalidConfig(_)
        | PipelineError::Json(_)
        | PipelineError::Io(_)
        | PipelineError::Other(_) => Terminal,
    }
}

/// What the engine should do after the validate stage (or a failed render).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// No errors: the run succeeded.
    Finish,
    /// Re-enter the render stage after pausing for `delay`.
    Retry { delay: Duration },
    /// Give up and surface the accumulated errors.
    Stop,
}

/// Attempt budget and cool-down rules for the render/validate loop.
///
/// # Example
///
/// ```
/// use doc_pipeline::retry::RetryPolicy;
/// use doc_pipeline::backend::BackoffConfig;
///
/// let policy = RetryPolicy::new(3).with_cool_down(BackoffConfig::none());
/// assert_eq!(policy.max_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts of the render/validate pair, including the first. Minimum 1.
    pub max_attempts: u32,

    /// Delay schedule between ordinary retries.
    pub cool_down: BackoffConfig,

    /// Pause after a rate-limit rejection without a `Retry-After` hint.
    pub rate_limit_cool_down: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            cool_down: BackoffConfig::standard(),
            rate_limit_cool_down: DEFAULT_RATE_LIMIT_COOL_DOWN,
        }
    }

    pub fn with_cool_down(mut self, cool_down: BackoffConfig) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn with_rate_limit_cool_down(mut self, delay: Duration) -> Self {
        self.rate_limit_cool_down = delay;
        self
    }

    /// True iff the most recent error is retryable and budget remains.
    ///
    /// Only the latest error counts; earlier classifications are stale.
    pub fn should_retry(&self, state: &WorkflowState) -> bool {
        match state.last_error() {
            Some(err) => err.is_retryable() && state.attempt < self.max_attempts,
            None => false,
        }
    }

    /// Pause to take before the next attempt, based on the latest error.
    ///
    /// Rate-limit rejections wait for the backend's hint, or
    /// `rate_limit_cool_down` without one. Other errors follow the backoff
    /// schedule unless the backend sent a hint anyway.
    pub fn cool_down_for(&self, state: &WorkflowState) -> Duration {
        let Some(err) = state.last_error() else {
            return Duration::ZERO;
        };
        if let Some(hint) = err.retry_after() {
            return hint;
        }
        if err.rate_limited {
            return self.rate_limit_cool_down;
        }
        self.cool_down
            .delay_for_attempt(state.attempt.saturating_sub(1))
    }

    /// Decide how the engine leaves the render/validate pair.
    pub fn decide(&self, state: &WorkflowState) -> RetryDecision {
        if !state.has_errors() {
            return RetryDecision::Finish;
        }
        if self.should_retry(state) {
            RetryDecision::Retry {
                delay: self.cool_down_for(state),
            }
        } else {
            RetryDecision::Stop
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageName;
    use crate::types::{InputRef, OutputKind};

    fn overloaded() -> PipelineError {
        PipelineError::Overloaded {
            provider: "mock".into(),
            message: "busy".into(),
        }
    }

    fn state_with(errors: &[PipelineError], attempt: u32) -> WorkflowState {
        let mut state = WorkflowState::new(InputRef::inline("x"), OutputKind::Pdf);
        state.attempt = attempt;
        for e in errors {
            state.record_error(StageName::Render, e);
        }
        state
    }

    #[test]
    fn test_classify_backend_conditions_retryable() {
        assert_eq!(classify(&overloaded()), ErrorClass::Retryable);
        assert_eq!(
            classify(&PipelineError::Timeout {
                provider: "p".into()
            }),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&PipelineError::RateLimited {
                provider: "p".into(),
                retry_after: None
            }),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&PipelineError::Validation("empty".into())),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_classify_input_and_auth_terminal() {
        assert_eq!(
            classify(&PipelineError::UnsupportedInput("docx".into())),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify(&PipelineError::Authentication {
                provider: "p".into(),
                message: "bad key".into()
            }),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify(&PipelineError::MalformedOutput("no json".into())),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify(&PipelineError::Other("?".into())),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_classify_http_statuses() {
        let http = |status| PipelineError::HttpError {
            status,
            body: String::new(),
            retry_after: None,
        };
        assert_eq!(classify(&http(503)), ErrorClass::Retryable);
        assert_eq!(classify(&http(429)), ErrorClass::Retryable);
        assert_eq!(classify(&http(401)), ErrorClass::Terminal);
        assert_eq!(classify(&http(400)), ErrorClass::Terminal);
    }

    #[test]
    fn test_should_retry_false_at_budget() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(&state_with(&[overloaded()], 2)));
        assert!(!policy.should_retry(&state_with(&[overloaded()], 3)));
    }

    #[test]
    fn test_should_retry_false_for_terminal_on_first_attempt() {
        let policy = RetryPolicy::new(3);
        let state = state_with(&[PipelineError::MalformedOutput("x".into())], 1);
        assert!(!policy.should_retry(&state));
        assert_eq!(policy.decide(&state), RetryDecision::Stop);
    }

    #[test]
    fn test_latest_error_wins() {
        let policy = RetryPolicy::new(5);
        let stale_retryable =
            state_with(&[overloaded(), PipelineError::MalformedOutput("x".into())], 1);
        assert!(!policy.should_retry(&stale_retryable));

        let stale_terminal =
            state_with(&[PipelineError::MalformedOutput("x".into()), overloaded()], 1);
        assert!(policy.should_retry(&stale_terminal));
    }

    #[test]
    fn test_decide_finish_without_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&state_with(&[], 1)), RetryDecision::Finish);
    }

    #[test]
    fn test_rate_limit_cool_down_uses_hint() {
        let policy = RetryPolicy::new(3).with_cool_down(BackoffConfig::none());
        let state = state_with(
            &[PipelineError::RateLimited {
                provider: "p".into(),
                retry_after: Some(Duration::from_secs(12)),
            }],
            1,
        );
        assert_eq!(
            policy.decide(&state),
            RetryDecision::Retry {
                delay: Duration::from_secs(12)
            }
        );
    }

    #[test]
    fn test_rate_limit_cool_down_default() {
        let policy = RetryPolicy::new(3)
            .with_cool_down(BackoffConfig::none())
            .with_rate_limit_cool_down(Duration::from_secs(5));
        let state = state_with(
            &[PipelineError::RateLimited {
                provider: "p".into(),
                retry_after: None,
            }],
            1,
        );
        assert_eq!(policy.cool_down_for(&state), Duration::from_secs(5));
    }

    #[test]
    fn test_ordinary_retry_uses_backoff() {
        let policy = RetryPolicy::new(3).with_cool_down(BackoffConfig::none());
        let state = state_with(&[overloaded()], 1);
        assert_eq!(policy.cool_down_for(&state), Duration::ZERO);
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
