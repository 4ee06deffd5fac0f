use crate::cache::PendingWrite;
use crate::error::PipelineError;
use crate::retry::{classify, ErrorClass};
use crate::stage::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where the source document comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InputRef {
    /// A local file.
    Path(PathBuf),
    /// A web page.
    Url(String),
    /// Text supplied directly by the caller.
    Inline(String),
}

impl InputRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        InputRef::Path(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        InputRef::Url(url.into())
    }

    pub fn inline(text: impl Into<String>) -> Self {
        InputRef::Inline(text.into())
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::Path(p) => write!(f, "{}", p.display()),
            InputRef::Url(u) => f.write_str(u),
            InputRef::Inline(t) => write!(f, "<inline text, {} bytes>", t.len()),
        }
    }
}

/// Detected kind of the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Pdf,
    Markdown,
    Web,
    Text,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Pdf => "pdf",
            InputKind::Markdown => "markdown",
            InputKind::Web => "web",
            InputKind::Text => "text",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of artifact the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Pdf,
    Slides,
    Markdown,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "pdf",
            OutputKind::Slides => "slides",
            OutputKind::Markdown => "markdown",
        }
    }

    /// Whether the artifact is a slide deck rather than a flowing article.
    pub fn is_deck(&self) -> bool {
        matches!(self, OutputKind::Slides)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a generated image attached to a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// File path or URL of the image.
    pub location: String,
    /// Hex fingerprint the image was cached under.
    pub fingerprint: String,
}

/// One section of the restructured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Stable identifier, unique within a document.
    pub id: String,
    pub heading: String,
    pub body: String,
    /// Prompt suggested by the model for this section's illustration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    /// Generated illustration, filled in by the image stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

/// Restructured document: title plus ordered sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    pub title: String,
    pub sections: Vec<Section>,
}

impl StructuredContent {
    /// Number of sections that have an attached image.
    pub fn image_count(&self) -> usize {
        self.sections.iter().filter(|s| s.image.is_some()).count()
    }
}

/// Location of a rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub kind: OutputKind,
}

/// An error recorded against the state, already classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that produced the error.
    pub stage: StageName,
    /// Attempt number the error occurred on (1-indexed).
    pub attempt: u32,
    pub class: ErrorClass,
    pub message: String,
    /// Backend cool-down hint in milliseconds, if one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Whether the error was a backend rate-limit rejection.
    #[serde(default)]
    pub rate_limited: bool,
}

impl StageError {
    /// Classify `err` and capture it as a record for `stage`.
    pub fn from_error(stage: StageName, attempt: u32, err: &PipelineError) -> Self {
        Self {
            stage,
            attempt,
            class: classify(err),
            message: err.to_string(),
            retry_after_ms: err.retry_after().map(|d| d.as_millis() as u64),
            rate_limited: matches!(err, PipelineError::RateLimited { .. })
                || matches!(err, PipelineError::HttpError { status: 429, .. }),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} attempt {} {}] {}",
            self.stage, self.attempt, self.class, self.message
        )
    }
}

/// The record threaded through every stage of one request.
///
/// Created with only the input reference and output kind populated; each
/// stage fills in more. Stages take it by value and hand it back in their
/// [`StageResult`](crate::stage::StageResult), so no two stages can hold it
/// at once.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub input: InputRef,
    pub input_kind: Option<InputKind>,
    pub output_kind: OutputKind,
    pub raw_text: Option<String>,
    pub content: Option<StructuredContent>,
    /// Errors of the current attempt. Cleared when the engine retries.
    pub errors: Vec<StageError>,
    /// Every error seen across all attempts, most recent last.
    pub error_history: Vec<StageError>,
    /// Current attempt (1-indexed).
    pub attempt: u32,
    pub output: Option<ArtifactRef>,
    /// Cache writes made by this run, committed when it ends uncancelled.
    pub pending_cache_writes: Vec<PendingWrite>,
}

impl WorkflowState {
    pub fn new(input: InputRef, output_kind: OutputKind) -> Self {
        Self {
            input,
            input_kind: None,
            output_kind,
            raw_text: None,
            content: None,
            errors: Vec::new(),
            error_history: Vec::new(),
            attempt: 1,
            output: None,
            pending_cache_writes: Vec::new(),
        }
    }

    /// Classify and record an error raised by `stage` on the current attempt.
    pub fn record_error(&mut self, stage: StageName, err: &PipelineError) -> &StageError {
        let record = StageError::from_error(stage, self.attempt, err);
        self.error_history.push(record.clone());
        self.errors.push(record);
        // just pushed
        &self.errors[self.errors.len() - 1]
    }

    /// Most recent error of the current attempt.
    pub fn last_error(&self) -> Option<&StageError> {
        self.errors.last()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
