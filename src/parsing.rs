//! Parsing utilities for model responses.
//!
//! Defensive extraction of JSON and thinking blocks from messy model text,
//! and conversion of the structuring answer into [`StructuredContent`].

use crate::error::Result;
use crate::types::{Section, StructuredContent};
use crate::PipelineError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Extract `<think>...</think>` blocks from a response (DeepSeek R1 style).
///
/// Returns `(thinking_content, cleaned_text)` where `cleaned_text` has the
/// thinking block removed and is trimmed.
pub fn extract_thinking(text: &str) -> (Option<String>, String) {
    let think_start = "<think>";
    let think_end = "</think>";

    if let Some(start_idx) = text.find(think_start) {
        if let Some(end_idx) = text.find(think_end) {
            let thinking = text[start_idx + think_start.len()..end_idx]
                .trim()
                .to_string();
            let mut cleaned = String::new();
            cleaned.push_str(&text[..start_idx]);
            cleaned.push_str(&text[end_idx + think_end.len()..]);
            let cleaned = cleaned.trim().to_string();
            let thinking = if thinking.is_empty() {
                None
            } else {
                Some(thinking)
            };
            return (thinking, cleaned);
        }
    }

    (None, text.to_string())
}

/// Extract JSON content from markdown fenced code blocks.
///
/// Recognizes `` ```json ``, `` ```JSON ``, and plain `` ``` `` fences.
pub fn extract_json_block(text: &str) -> Option<String> {
    let markers = ["```json", "```JSON", "```"];
    for marker in markers {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Try to locate and extract a JSON object or array from text that may
/// contain surrounding prose.
///
/// Tries, in order:
/// 1. Markdown code block extraction
/// 2. First `{` or `[` with matching closer
pub fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();

    // Try markdown block first
    if let Some(block) = extract_json_block(trimmed) {
        return Some(block);
    }

    // Find first { or [
    if let Some(idx) = trimmed.find('{').or_else(|| trimmed.find('[')) {
        let candidate = &trimmed[idx..];
        // Try parsing the whole remainder
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
        // Try finding matching closing brace/bracket
        let open = candidate.as_bytes()[0];
        let close = if open == b'{' { b'}' } else { b']' };
        if let Some(end) = candidate.rfind(close as char) {
            let substr = &candidate[..=end];
            if serde_json::from_str::<Value>(substr).is_ok() {
                return Some(substr.to_string());
            }
        }
    }

    None
}

/// Parse text into a typed `T` with defensive JSON extraction.
///
/// Tries direct parse, markdown block extraction, and embedded JSON detection.
pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();

    // Try direct parse
    if let Ok(val) = serde_json::from_str::<T>(trimmed) {
        return Ok(val);
    }

    // Try extracting JSON from markdown code blocks
    if let Some(json_str) = extract_json_block(trimmed) {
        if let Ok(val) = serde_json::from_str::<T>(&json_str) {
            return Ok(val);
        }
    }

    // Try finding first { or [ and parsing from there
    if let Some(idx) = trimmed.find('{').or_else(|| trimmed.find('[')) {
        let candidate = &trimmed[idx..];
        if let Ok(val) = serde_json::from_str::<T>(candidate) {
            return Ok(val);
        }
        let open = candidate.as_bytes()[0];
        let close = if open == b'{' { b'}' } else { b']' };
        if let Some(end) = candidate.rfind(close as char) {
            let substr = &candidate[..=end];
            if let Ok(val) = serde_json::from_str::<T>(substr) {
                return Ok(val);
            }
        }
    }

    Err(PipelineError::MalformedOutput(format!(
        "expected JSON of the requested shape. Raw text (truncated): {}",
        truncate(trimmed, 200)
    )))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "slides")]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "title")]
    heading: String,
    #[serde(default, alias = "content", alias = "text")]
    body: String,
    #[serde(default, alias = "image", alias = "visual")]
    image_prompt: Option<String>,
}

/// Turn the structuring answer into [`StructuredContent`].
///
/// Strips `<think>` blocks, accepts a few common key aliases, drops empty
/// sections, and assigns `s1`, `s2`, ... to sections without a unique id.
/// Fails with [`PipelineError::MalformedOutput`] when nothing usable remains.
pub fn parse_structured(text: &str) -> Result<StructuredContent> {
    let (_, cleaned) = extract_thinking(text);
    let raw: RawContent = parse_as(&cleaned)?;

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(raw.sections.len());
    for (i, s) in raw
        .sections
        .into_iter()
        .filter(|s| !s.heading.trim().is_empty() || !s.body.trim().is_empty())
        .enumerate()
    {
        let id = match s.id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() && !seen.contains(&id) => id,
            _ => {
                let mut n = i + 1;
                while seen.contains(&format!("s{}", n)) {
                    n += 1;
                }
                format!("s{}", n)
            }
        };
        seen.insert(id.clone());
        sections.push(Section {
            id,
            heading: s.heading.trim().to_string(),
            body: s.body.trim().to_string(),
            image_prompt: s.image_prompt.filter(|p| !p.trim().is_empty()),
            image: None,
        });
    }

    if sections.is_empty() {
        return Err(PipelineError::MalformedOutput(
            "structured content has no sections".into(),
        ));
    }

    let title = match raw.title.trim() {
        "" => sections[0].heading.clone(),
        t => t.to_string(),
    };
    Ok(StructuredContent { title, sections })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_thinking_present() {
        let text = "Before <think>my reasoning here</think> after";
        let (thinking, cleaned) = extract_thinking(text);
        assert_eq!(thinking, Some("my reasoning here".to_string()));
        assert_eq!(cleaned, "Before  after");
    }

    #[test]
    fn test_extract_thinking_absent() {
        let text = "no thinking tags here";
        let (thinking, cleaned) = extract_thinking(text);
        assert!(thinking.is_none());
        assert_eq!(cleaned, "no thinking tags here");
    }

    #[test]
    fn test_extract_thinking_empty() {
        let text = "<think>  </think>actual content";
        let (thinking, cleaned) = extract_thinking(text);
        assert!(thinking.is_none());
        assert_eq!(cleaned, "actual content");
    }

    #[test]
    fn test_extract_json_block() {
        let text = "text\n```json\n{\"a\":1}\n```\nmore";
        assert_eq!(extract_json_block(text), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn test_extract_json_block_none() {
        assert_eq!(extract_json_block("no code block"), None);
    }

    #[test]
    fn test_extract_json_candidate_from_block() {
        let text = "```json\n{\"x\":1}\n```";
        assert_eq!(extract_json_candidate(text), Some("{\"x\":1}".to_string()));
    }

    #[test]
    fn test_extract_json_candidate_embedded() {
        let text = "Here is the result: {\"name\": \"test\"} done.";
        let candidate = extract_json_candidate(text);
        assert!(candidate.is_some());
        let val: Value = serde_json::from_str(&candidate.unwrap()).unwrap();
        assert_eq!(val["name"], "test");
    }

    #[test]
    fn test_parse_as_direct() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct T {
            value: String,
        }
        let result: T = parse_as(r#"{"value": "hello"}"#).unwrap();
        assert_eq!(result.value, "hello");
    }

    #[test]
    fn test_parse_as_markdown_block() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct T {
            x: i32,
        }
        let text = "Here:\n```json\n{\"x\": 42}\n```\nDone.";
        let result: T = parse_as(text).unwrap();
        assert_eq!(result.x, 42);
    }

    #[test]
    fn test_parse_as_embedded() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct T {
            name: String,
        }
        let text = "Sure! {\"name\": \"test\"} hope that helps.";
        let result: T = parse_as(text).unwrap();
        assert_eq!(result.name, "test");
    }

    #[test]
    fn test_parse_as_failure() {
        #[derive(Debug, serde::Deserialize)]
        struct T {
            _x: i32,
        }
        let result = parse_as::<T>("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_structured_basic() {
        let text = r#"{"title": "Ownership", "sections": [
            {"heading": "Moves", "body": "One owner.", "image_prompt": "a baton pass"},
            {"heading": "Borrows", "content": "Shared access."}
        ]}"#;
        let content = parse_structured(text).unwrap();
        assert_eq!(content.title, "Ownership");
        assert_eq!(content.sections.len(), 2);
        assert_eq!(content.sections[0].id, "s1");
        assert_eq!(content.sections[0].image_prompt.as_deref(), Some("a baton pass"));
        assert_eq!(content.sections[1].body, "Shared access.");
        assert!(content.sections[1].image_prompt.is_none());
    }

    #[test]
    fn test_parse_structured_with_thinking_and_fence() {
        let text = "<think>plan the outline</think>\n```json\n{\"title\": \"T\", \"sections\": [{\"heading\": \"A\", \"body\": \"a\"}]}\n```";
        let content = parse_structured(text).unwrap();
        assert_eq!(content.sections[0].heading, "A");
    }

    #[test]
    fn test_parse_structured_dedupes_ids_and_fills_title() {
        let text = r#"{"sections": [
            {"id": "x", "heading": "First", "body": "1"},
            {"id": "x", "heading": "Second", "body": "2"},
            {"heading": "", "body": "  "}
        ]}"#;
        let content = parse_structured(text).unwrap();
        assert_eq!(content.title, "First");
        assert_eq!(content.sections.len(), 2);
        assert_eq!(content.sections[0].id, "x");
        assert_eq!(content.sections[1].id, "s2");
    }

    #[test]
    fn test_parse_structured_empty_is_malformed() {
        let err = parse_structured(r#"{"title": "T", "sections": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput(_)));
        let err = parse_structured("I cannot help with that.").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput(_)));
    }
}
