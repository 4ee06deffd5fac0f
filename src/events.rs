//! Progress observer hooks.
//!
//! The engine reports to the outside world only through [`Event`]s delivered
//! to an optional [`EventHandler`]. Every stage completion produces a
//! [`Event::StageProgress`], including repeats of `render` and `validate` on
//! retries.

use crate::stage::StageName;
use std::sync::Arc;

/// Which cache call site an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Whole-document structuring.
    Structure,
    /// One section's image.
    Image,
}

/// Events emitted while a request runs.
#[derive(Debug, Clone)]
pub enum Event {
    /// A stage is about to run.
    StageStarted {
        stage: StageName,
        /// Attempt number (1-indexed).
        attempt: u32,
    },
    /// A stage finished, successfully or not.
    StageProgress {
        stage: StageName,
        /// Share of the six stages completed, in `(0, 1]`.
        fraction: f64,
        message: String,
        attempt: u32,
    },
    /// A fingerprint was found in the cache.
    CacheHit {
        scope: CacheScope,
        fingerprint: String,
    },
    /// A fingerprint was not found; the provider will be called.
    CacheMiss {
        scope: CacheScope,
        fingerprint: String,
    },
    /// One section's image is ready (or was skipped after a transient failure).
    SectionImage {
        section_id: String,
        cached: bool,
        ok: bool,
    },
    /// The engine is looping back to `render`.
    RetryScheduled {
        /// The attempt about to start.
        next_attempt: u32,
        /// Cool-down before it starts, in milliseconds.
        delay_ms: u64,
        /// The error that triggered the retry.
        reason: String,
    },
    /// The run reached a terminal state.
    WorkflowFinished {
        succeeded: bool,
        attempts: u32,
    },
}

/// Receiver for pipeline events.
///
/// This is entirely optional -- the pipeline runs without a handler.
///
/// # Example
///
/// ```
/// use doc_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::StageProgress { stage, fraction, message, .. } = event {
///             println!("[{:>3.0}%] {}: {}", fraction * 100.0, stage, message);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use doc_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::RetryScheduled { next_attempt, .. } = event {
///         eprintln!("retrying, attempt {}", next_attempt);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Collects every event in memory. Handy in tests and for post-run reports.
#[derive(Debug, Default)]
pub struct EventLog {
    events: std::sync::Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Progress notifications for `stage`, in order.
    pub fn progress_for(&self, stage: StageName) -> Vec<(f64, String, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StageProgress {
                    stage: s,
                    fraction,
                    message,
                    attempt,
                } if s == stage => Some((fraction, message, attempt)),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for EventLog {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(
            &None,
            Event::WorkflowFinished {
                succeeded: true,
                attempts: 1,
            },
        );
    }

    #[test]
    fn test_fn_handler_receives_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: Option<Arc<dyn EventHandler>> =
            Some(Arc::new(FnEventHandler(move |_e: Event| {
                c.fetch_add(1, Ordering::SeqCst);
            })));
        emit(
            &handler,
            Event::StageStarted {
                stage: StageName::Parse,
                attempt: 1,
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_log_filters_progress() {
        let log = EventLog::new();
        log.on_event(Event::StageProgress {
            stage: StageName::Render,
            fraction: 5.0 / 6.0,
            message: "ok".into(),
            attempt: 1,
        });
        log.on_event(Event::StageProgress {
            stage: StageName::Validate,
            fraction: 1.0,
            message: "ok".into(),
            attempt: 1,
        });
        assert_eq!(log.progress_for(StageName::Render).len(), 1);
        assert_eq!(log.events().len(), 2);
    }
}
