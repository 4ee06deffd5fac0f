//! Renderers: turn structured content into an artifact on disk.
//!
//! The `render` stage only cares about where the artifact lands. Layout,
//! fonts and slide design belong to the renderer.

use crate::error::Result;
use crate::types::{ArtifactRef, OutputKind, StructuredContent};
use crate::PipelineError;
use async_trait::async_trait;
use std::path::Path;

/// Produces an artifact for one or more output kinds.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: OutputKind) -> bool;

    /// Write the artifact under `output_dir` and return where it is.
    async fn render(
        &self,
        content: &StructuredContent,
        kind: OutputKind,
        output_dir: &Path,
    ) -> Result<ArtifactRef>;
}

/// File-name-safe slug of a title. Falls back to `"document"`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.chars().take(80).collect()
    }
}

/// Writes `<output_dir>/<slug>.md` with one `##` heading per section and
/// image links where images were generated.
#[derive(Debug, Clone, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn to_markdown(content: &StructuredContent) -> String {
        let mut out = format!("# {}\n", content.title.trim());
        for section in &content.sections {
            out.push_str(&format!("\n## {}\n\n", section.heading.trim()));
            if let Some(ref image) = section.image {
                out.push_str(&format!("![{}]({})\n\n", section.heading.trim(), image.location));
            }
            out.push_str(section.body.trim());
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl Renderer for MarkdownRenderer {
    fn name(&self) -> &str {
        "markdown"
    }

    fn supports(&self, kind: OutputKind) -> bool {
        kind == OutputKind::Markdown
    }

    async fn render(
        &self,
        content: &StructuredContent,
        kind: OutputKind,
        output_dir: &Path,
    ) -> Result<ArtifactRef> {
        if !self.supports(kind) {
            return Err(PipelineError::InvalidConfig(format!(
                "markdown renderer cannot produce {}",
                kind
            )));
        }
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| PipelineError::Render(format!("{}: {}", output_dir.display(), e)))?;
        let path = output_dir.join(format!("{}.md", slugify(&content.title)));
        tokio::fs::write(&path, Self::to_markdown(content))
            .await
            .map_err(|e| PipelineError::Render(format!("{}: {}", path.display(), e)))?;
        Ok(ArtifactRef { path, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageRef, Section};

    fn content() -> StructuredContent {
        StructuredContent {
            title: "Rust Ownership, Explained!".into(),
            sections: vec![
                Section {
                    id: "s1".into(),
                    heading: "Moves".into(),
                    body: "Values have one owner.".into(),
                    image_prompt: None,
                    image: Some(ImageRef {
                        location: "images/abc.png".into(),
                        fingerprint: "abc".into(),
                    }),
                },
                Section {
                    id: "s2".into(),
                    heading: "Borrows".into(),
                    body: "References do not own.".into(),
                    image_prompt: None,
                    image: None,
                },
            ],
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust Ownership, Explained!"), "rust-ownership-explained");
        assert_eq!(slugify("  ***  "), "document");
        assert_eq!(slugify("Über Café"), "ber-caf");
    }

    #[test]
    fn test_to_markdown() {
        let md = MarkdownRenderer::to_markdown(&content());
        assert!(md.starts_with("# Rust Ownership, Explained!\n"));
        assert!(md.contains("## Moves\n\n![Moves](images/abc.png)\n\nValues have one owner."));
        assert!(md.contains("## Borrows\n\nReferences do not own."));
    }

    #[tokio::test]
    async fn test_render_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = MarkdownRenderer
            .render(&content(), OutputKind::Markdown, dir.path())
            .await
            .unwrap();
        assert_eq!(artifact.path, dir.path().join("rust-ownership-explained.md"));
        let written = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(written.contains("## Borrows"));
    }

    #[tokio::test]
    async fn test_render_rejects_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let err = MarkdownRenderer
            .render(&content(), OutputKind::Pdf, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
