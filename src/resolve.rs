//! Input resolvers: turn an [`InputRef`] into raw text.
//!
//! The `parse` stage hands the input to the first registered resolver that
//! accepts it. Built-ins cover plain text and Markdown files, inline text and
//! web pages; PDF extraction is left to a caller-supplied resolver.

use crate::backend::map_http_error;
use crate::error::Result;
use crate::types::{InputKind, InputRef};
use crate::PipelineError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

/// Turns an input reference into raw text.
#[async_trait]
pub trait InputResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this resolver handles `input` of the detected `kind`.
    fn accepts(&self, kind: InputKind, input: &InputRef) -> bool;

    async fn resolve(&self, kind: InputKind, input: &InputRef) -> Result<String>;
}

/// Reads local plain-text and Markdown files.
#[derive(Debug, Clone, Default)]
pub struct TextFileResolver;

#[async_trait]
impl InputResolver for TextFileResolver {
    fn name(&self) -> &str {
        "text-file"
    }

    fn accepts(&self, kind: InputKind, input: &InputRef) -> bool {
        matches!(kind, InputKind::Text | InputKind::Markdown) && matches!(input, InputRef::Path(_))
    }

    async fn resolve(&self, _kind: InputKind, input: &InputRef) -> Result<String> {
        let InputRef::Path(path) = input else {
            return Err(PipelineError::UnsupportedInput(input.to_string()));
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::InputUnavailable(format!("{}: {}", path.display(), e)))?;
        String::from_utf8(bytes).map_err(|_| {
            PipelineError::InputUnavailable(format!("{} is not valid UTF-8", path.display()))
        })
    }
}

/// Passes caller-supplied text through.
#[derive(Debug, Clone, Default)]
pub struct InlineTextResolver;

#[async_trait]
impl InputResolver for InlineTextResolver {
    fn name(&self) -> &str {
        "inline"
    }

    fn accepts(&self, kind: InputKind, input: &InputRef) -> bool {
        kind == InputKind::Text && matches!(input, InputRef::Inline(_))
    }

    async fn resolve(&self, _kind: InputKind, input: &InputRef) -> Result<String> {
        match input {
            InputRef::Inline(text) => Ok(text.clone()),
            other => Err(PipelineError::UnsupportedInput(other.to_string())),
        }
    }
}

static RE_SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>").unwrap()
});
static RE_BLOCK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(p|div|br|h[1-6]|li|tr|section|article)\b[^>]*>").unwrap());
static RE_ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Reduce an HTML page to readable text.
pub fn html_to_text(html: &str) -> String {
    let text = RE_SCRIPT_OR_STYLE.replace_all(html, "");
    let text = RE_BLOCK_TAG.replace_all(&text, "\n");
    let text = RE_ANY_TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let text = RE_SPACES.replace_all(&text, " ");
    let text: String = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Fetches a web page and strips its markup.
#[derive(Debug, Clone)]
pub struct WebResolver {
    client: Client,
}

impl WebResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InputResolver for WebResolver {
    fn name(&self) -> &str {
        "web"
    }

    fn accepts(&self, kind: InputKind, input: &InputRef) -> bool {
        kind == InputKind::Web && matches!(input, InputRef::Url(_))
    }

    async fn resolve(&self, _kind: InputKind, input: &InputRef) -> Result<String> {
        let InputRef::Url(url) = input else {
            return Err(PipelineError::UnsupportedInput(input.to_string()));
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::InputUnavailable(format!("{}: {}", url, e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match map_http_error("web", status, body, None) {
                PipelineError::HttpError { status, .. } => {
                    PipelineError::InputUnavailable(format!("{} returned HTTP {}", url, status))
                }
                other => other,
            });
        }
        let html = resp
            .text()
            .await
            .map_err(|e| PipelineError::InputUnavailable(format!("{}: {}", url, e)))?;
        Ok(html_to_text(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><style>p { color: red }</style>
            <script>alert("x")</script></head>
            <body><h1>Title</h1><p>First &amp; <b>bold</b>   para.</p><p>Second</p></body></html>"#;
        let text = html_to_text(html);
        assert!(text.starts_with("Title"));
        assert!(text.contains("First & bold para."));
        assert!(text.contains("Second"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[tokio::test]
    async fn test_text_file_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes\n\nhello").unwrap();
        let input = InputRef::path(&path);

        let resolver = TextFileResolver;
        assert!(resolver.accepts(InputKind::Markdown, &input));
        assert!(!resolver.accepts(InputKind::Pdf, &input));
        let text = resolver.resolve(InputKind::Markdown, &input).await.unwrap();
        assert_eq!(text, "# Notes\n\nhello");
    }

    #[tokio::test]
    async fn test_text_file_resolver_missing_file() {
        let err = TextFileResolver
            .resolve(InputKind::Text, &InputRef::path("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputUnavailable(_)));
    }

    #[tokio::test]
    async fn test_inline_resolver() {
        let input = InputRef::inline("raw words");
        assert!(InlineTextResolver.accepts(InputKind::Text, &input));
        assert!(!InlineTextResolver.accepts(InputKind::Web, &input));
        assert_eq!(
            InlineTextResolver.resolve(InputKind::Text, &input).await.unwrap(),
            "raw words"
        );
    }

    #[test]
    fn test_web_resolver_accepts_only_urls() {
        let r = WebResolver::new(Client::new());
        assert!(r.accepts(InputKind::Web, &InputRef::url("https://example.com")));
        assert!(!r.accepts(InputKind::Web, &InputRef::inline("x")));
    }
}
