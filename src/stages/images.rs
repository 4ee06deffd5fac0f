use crate::backend::{GenerationParams, GenerationRequest, ImageData};
use crate::cache::{CachedArtifact, Fingerprint, FingerprintParams, PendingWrite};
use crate::error::Result;
use crate::events::{emit, CacheScope, Event};
use crate::exec_ctx::ExecCtx;
use crate::prompt::{self, PROMPT_VERSION};
use crate::retry::{classify, ErrorClass};
use crate::stage::{BoxFut, Stage, StageName, StageResult};
use crate::types::{ImageRef, Section, WorkflowState};
use crate::PipelineError;
use base64::Engine;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One section's image request, keyed by what the image depends on.
struct ImageJob {
    section_id: String,
    prompt: String,
    key: Fingerprint,
    params: FingerprintParams,
}

/// Cache key for a section's illustration.
///
/// Covers the section's own text and suggested prompt plus the image style,
/// provider, endpoint, model and size. Nothing document-wide goes in, so editing one
/// section only invalidates that section's image.
pub fn image_key(ctx: &ExecCtx, section: &Section) -> (Fingerprint, FingerprintParams) {
    let spec = &ctx.providers.image_spec;
    let params = FingerprintParams::new()
        .with("stage", "image")
        .with("prompt_version", PROMPT_VERSION)
        .with("provider", ctx.providers.image.id())
        .with("endpoint", spec.base_url_or_default())
        .with("model", spec.model.as_str())
        .with("style", ctx.config.image_style.as_str())
        .with("size", spec.image_size.clone().unwrap_or_default());
    let content = format!(
        "{}\n\n{}\n\n{}",
        section.heading,
        section.body,
        section.image_prompt.as_deref().unwrap_or_default()
    );
    (Fingerprint::compute(&content, &params), params)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Decode inline image bytes into `<output_dir>/images/<fingerprint>.<ext>`.
async fn save_image(output_dir: &Path, key: &Fingerprint, data: &str, mime: &str) -> Result<PathBuf> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| PipelineError::MalformedOutput(format!("image is not valid base64: {}", e)))?;
    let dir = output_dir.join("images");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{}.{}", key, extension_for(mime)));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Remote locations are trusted; local files must still exist.
async fn location_available(location: &str) -> bool {
    if location.contains("://") {
        return true;
    }
    tokio::fs::try_exists(location).await.unwrap_or(false)
}

/// The section's image, plus the cache write to make if it was generated.
async fn generate_one(ctx: &ExecCtx, job: &ImageJob) -> Result<(ImageRef, Option<PendingWrite>)> {
    if let Some(entry) = ctx.cache.get(&job.key) {
        if let CachedArtifact::Location(location) = entry.artifact {
            if location_available(&location).await {
                emit(
                    &ctx.event_handler,
                    Event::CacheHit {
                        scope: CacheScope::Image,
                        fingerprint: job.key.to_string(),
                    },
                );
                let image = ImageRef {
                    location,
                    fingerprint: job.key.to_string(),
                };
                return Ok((image, None));
            }
            tracing::debug!(section = %job.section_id, location = %location, "cached image is gone, regenerating");
            ctx.cache.invalidate(&job.key);
        }
    }
    emit(
        &ctx.event_handler,
        Event::CacheMiss {
            scope: CacheScope::Image,
            fingerprint: job.key.to_string(),
        },
    );

    let spec = &ctx.providers.image_spec;
    let request = GenerationRequest::new(spec.model.clone(), job.prompt.clone()).with_params(
        GenerationParams {
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
            json_mode: false,
            size: spec.image_size.clone(),
        },
    );
    let image = ctx
        .providers
        .image
        .generate_image(&request)
        .await?
        .into_image()?;
    let location = match image {
        ImageData::Url(url) => url,
        ImageData::Base64 { data, mime } => save_image(ctx.output_dir(), &job.key, &data, &mime)
            .await?
            .to_string_lossy()
            .into_owned(),
    };

    let write = PendingWrite {
        key: job.key.clone(),
        artifact: CachedArtifact::Location(location.clone()),
        params: job.params.clone(),
    };
    let image = ImageRef {
        location,
        fingerprint: job.key.to_string(),
    };
    Ok((image, Some(write)))
}

/// `generate-images`: one illustration per section, through the cache,
/// with at most `image_concurrency` provider calls in flight.
///
/// A section whose image fails transiently is left without one; a terminal
/// failure (bad credentials, unusable output) fails the stage.
#[derive(Debug, Clone, Default)]
pub struct GenerateImages;

impl GenerateImages {
    async fn apply(&self, ctx: &ExecCtx, state: &mut WorkflowState) -> Result<()> {
        if !ctx.config.enable_images {
            tracing::debug!("image generation disabled");
            return Ok(());
        }
        let content = state
            .content
            .as_mut()
            .ok_or_else(|| PipelineError::Other("generate-images ran before transform".into()))?;

        let style = ctx.config.image_style.as_str();
        let jobs: Vec<ImageJob> = content
            .sections
            .iter()
            .map(|section| {
                let (key, params) = image_key(ctx, section);
                ImageJob {
                    section_id: section.id.clone(),
                    prompt: prompt::image_prompt(section, style),
                    key,
                    params,
                }
            })
            .collect();

        let concurrency = ctx.config.image_concurrency.max(1);
        let results: Vec<(String, Result<(ImageRef, Option<PendingWrite>)>)> = stream::iter(jobs)
            .map(|job| async move {
                let result = generate_one(ctx, &job).await;
                (job.section_id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut images: HashMap<String, ImageRef> = HashMap::with_capacity(results.len());
        let mut terminal: Option<PipelineError> = None;
        let mut writes = Vec::new();
        let mut cached = 0usize;
        for (section_id, result) in results {
            match result {
                Ok((image, write)) => {
                    let hit = write.is_none();
                    cached += usize::from(hit);
                    writes.extend(write);
                    emit(
                        &ctx.event_handler,
                        Event::SectionImage {
                            section_id: section_id.clone(),
                            cached: hit,
                            ok: true,
                        },
                    );
                    images.insert(section_id, image);
                }
                Err(e) => {
                    emit(
                        &ctx.event_handler,
                        Event::SectionImage {
                            section_id: section_id.clone(),
                            cached: false,
                            ok: false,
                        },
                    );
                    if classify(&e) == ErrorClass::Terminal {
                        terminal.get_or_insert(e);
                    } else {
                        tracing::warn!(section = %section_id, error = %e, "image generation failed, section left without image");
                    }
                }
            }
        }
        // images that did land stay cached even if the stage fails
        state.pending_cache_writes.extend(writes);
        if let Some(e) = terminal {
            return Err(e);
        }

        for section in content.sections.iter_mut() {
            section.image = images.remove(&section.id);
        }
        tracing::info!(
            sections = content.sections.len(),
            images = content.image_count(),
            cached,
            "images attached"
        );
        Ok(())
    }
}

impl Stage for GenerateImages {
    fn name(&self) -> StageName {
        StageName::GenerateImages
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, mut state: WorkflowState) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let result = self.apply(ctx, &mut state).await;
            StageResult::from_result(self.name(), state, result)
        })
    }
}
