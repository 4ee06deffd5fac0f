//! Deterministic cache keys.
//!
//! A [`Fingerprint`] is the SHA-256 of a canonical JSON document holding the
//! normalized content and every parameter that affects the output. Parameters
//! live in a `BTreeMap`, so insertion order never changes the key.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Hex-encoded SHA-256 cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the key for `content` generated under `params`.
    pub fn compute(content: &str, params: &FingerprintParams) -> Self {
        let canonical = json!({
            "content": normalize(content),
            "params": params.0,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for file names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Accept a previously computed hex key.
    pub fn from_hex(hex_key: impl Into<String>) -> Option<Self> {
        let s = hex_key.into();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Fingerprint(s.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation parameters that feed a fingerprint.
///
/// # Example
///
/// ```
/// use doc_pipeline::cache::{Fingerprint, FingerprintParams};
///
/// let a = FingerprintParams::new().with("model", "m").with("temperature", 0.7);
/// let b = FingerprintParams::new().with("temperature", 0.7).with("model", "m");
/// assert_eq!(Fingerprint::compute("text", &a), Fingerprint::compute("text", &b));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintParams(BTreeMap<String, Value>);

impl FingerprintParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Canonicalize text so formatting-only edits keep the same key.
///
/// Line endings become `\n`, trailing whitespace is dropped from every line,
/// runs of blank lines collapse to one, and the whole is trimmed. A line
/// ending in two or more spaces is a Markdown hard break and keeps exactly
/// two.
pub fn normalize(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<Cow<'_, str>> = Vec::new();
    let mut prev_blank = true;
    for raw in unified.lines() {
        let line = raw.trim_end();
        let blank = line.is_empty();
        if blank && prev_blank {
            continue;
        }
        prev_blank = blank;
        if !blank && raw.len() - raw.trim_end_matches(' ').len() >= 2 {
            lines.push(Cow::Owned(format!("{}  ", line)));
        } else {
            lines.push(Cow::Borrowed(line));
        }
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FingerprintParams {
        FingerprintParams::new()
            .with("provider", "ollama")
            .with("model", "llama3.2:3b")
            .with("temperature", 0.7)
    }

    #[test]
    fn test_deterministic() {
        let a = Fingerprint::compute("Hello world", &params());
        let b = Fingerprint::compute("Hello world", &params());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_content_sensitive() {
        let a = Fingerprint::compute("Hello world", &params());
        let b = Fingerprint::compute("Hello world!", &params());
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_param_sensitive() {
        let base = Fingerprint::compute("x", &params());
        assert_ne!(base, Fingerprint::compute("x", &params().with("model", "other")));
        assert_ne!(base, Fingerprint::compute("x", &params().with("temperature", 0.2)));
        assert_ne!(base, Fingerprint::compute("x", &params().with("style", "sketch")));
    }

    #[test]
    fn test_content_and_params_do_not_bleed() {
        let a = Fingerprint::compute("ab", &FingerprintParams::new().with("k", "c"));
        let b = Fingerprint::compute("a", &FingerprintParams::new().with("k", "bc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_whitespace_only_edits_ignored() {
        let a = Fingerprint::compute("Title\n\nBody text", &params());
        let b = Fingerprint::compute("Title \t\r\n\r\n\r\n\r\nBody text   \n\n", &params());
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  a \r\nb\t\n\n\n\nc\n"), "a\nb\n\nc");
        assert_eq!(normalize("\n\n"), "");
    }

    #[test]
    fn test_markdown_hard_breaks_survive() {
        assert_eq!(normalize("roses  \nviolets"), "roses  \nviolets");
        assert_eq!(normalize("roses    \r\nviolets"), "roses  \nviolets");
        assert_ne!(normalize("roses  \nviolets"), normalize("roses\nviolets"));
    }

    #[test]
    fn test_from_hex() {
        let fp = Fingerprint::compute("x", &params());
        assert_eq!(Fingerprint::from_hex(fp.to_string()), Some(fp.clone()));
        assert_eq!(Fingerprint::from_hex("not-hex"), None);
        assert_eq!(fp.short().len(), 12);
    }
}
