//! Prompt templates for the structuring and image calls.
//!
//! Templates use `{key}` placeholders; `{{` and `}}` produce literal braces,
//! which the structuring template needs for its JSON example.

use crate::types::{OutputKind, Section};

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Bumped whenever the templates below change, so stale cache entries miss.
pub const PROMPT_VERSION: &str = "1";

pub const STRUCTURE_SYSTEM_PROMPT: &str = "You are an editor who turns raw source material \
into clear, well-organised documents. You never invent facts that are not in the source. \
You always answer with a single JSON object and nothing else.";

const STRUCTURE_TEMPLATE: &str = r#"Restructure the following {content_type} into a {target} for a {audience} audience.

Return JSON with exactly this shape:
{{"title": "...", "sections": [{{"heading": "...", "body": "...", "image_prompt": "..."}}]}}

Rules:
- Keep every fact from the source; do not add new ones.
- {section_rule}
- "image_prompt" describes one illustration for the section in a single sentence, or is omitted when no illustration would help.

Source:
{input}"#;

const IMAGE_TEMPLATE: &str = "Create a clean, professional illustration for a document section.\n\
Subject: {subject}\n\
Style: {style}\n\
Use only the concepts in the subject. No text, watermarks or logos in the image.";

/// Build a prompt string with variable substitution.
///
/// Replaces `{key}` placeholders with the matching value from `vars`.
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
///
/// # Example
///
/// ```
/// use doc_pipeline::prompt::render;
///
/// let result = render("Hello {name}, here is JSON: {{\"key\": \"val\"}}", &[("name", "Alice")]);
/// assert_eq!(result, r#"Hello Alice, here is JSON: {"key": "val"}"#);
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    // Pass 1: protect escaped braces
    let mut rendered = template.replace("{{", ESCAPE_SENTINEL);
    rendered = rendered.replace("}}", ESCAPE_SENTINEL_CLOSE);

    // Pass 2: substitute placeholders
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    // Pass 3: restore escaped braces
    rendered = rendered.replace(ESCAPE_SENTINEL, "{");
    rendered = rendered.replace(ESCAPE_SENTINEL_CLOSE, "}");
    rendered
}

/// User prompt for the structuring call.
pub fn structure_prompt(raw_text: &str, content_type: &str, audience: &str, output: OutputKind) -> String {
    let (target, section_rule) = if output.is_deck() {
        (
            "slide deck",
            "Each section is one slide: a short heading and a body of at most five concise bullet lines.",
        )
    } else {
        (
            "well-structured article",
            "Each section has a descriptive heading and a body of one to four paragraphs.",
        )
    };
    // source text goes in last so its braces are never treated as placeholders
    render(
        STRUCTURE_TEMPLATE,
        &[
            ("content_type", content_type),
            ("target", target),
            ("audience", audience),
            ("section_rule", section_rule),
        ],
    )
    .replace("{input}", raw_text)
}

/// Prompt for one section's illustration.
///
/// Uses the model's suggested `image_prompt` when there is one, otherwise the
/// heading plus the start of the body.
pub fn image_prompt(section: &Section, style: &str) -> String {
    let subject = match section.image_prompt.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => {
            let excerpt: String = section.body.chars().take(300).collect();
            format!("{}: {}", section.heading.trim(), excerpt.trim())
        }
    };
    let style = if style.trim().is_empty() || style == "auto" {
        "modern flat illustration, muted professional palette"
    } else {
        style
    };
    render(IMAGE_TEMPLATE, &[("style", style)]).replace("{subject}", &subject)
}
