//! Example: restructure a Markdown file into an illustrated Markdown article.
//!
//! Runs offline against mock providers unless a config file is given:
//!
//! ```text
//! cargo run --example markdown_pipeline -- notes.md
//! cargo run --example markdown_pipeline -- notes.md pipeline.json
//! RUST_LOG=doc_pipeline=debug cargo run --example markdown_pipeline -- notes.md
//! ```

use doc_pipeline::backend::{MockProvider, ProviderKind, Providers};
use doc_pipeline::{
    Event, ExecCtx, FnEventHandler, InputRef, OutputKind, Pipeline, PipelineConfig, ProviderSpec,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CANNED: &str = r#"{
    "title": "Release Notes",
    "sections": [
        {"heading": "What changed", "body": "The cache now expires entries after a day.", "image_prompt": "An hourglass beside a filing cabinet"},
        {"heading": "Upgrading", "body": "No configuration changes are needed."}
    ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| "README.md".to_string());

    let handler = Arc::new(FnEventHandler(|event: Event| match event {
        Event::StageProgress {
            stage,
            fraction,
            message,
            attempt,
        } => println!("[{:>3.0}%] {} (attempt {}): {}", fraction * 100.0, stage, attempt, message),
        Event::RetryScheduled {
            next_attempt,
            delay_ms,
            reason,
        } => println!("retrying as attempt {} in {}ms: {}", next_attempt, delay_ms, reason),
        _ => {}
    }));

    let builder = match args.next() {
        Some(path) => ExecCtx::builder(PipelineConfig::from_path(path)?),
        None => {
            let providers = Providers::new(
                Arc::new(MockProvider::fixed(CANNED)),
                ProviderSpec::new(ProviderKind::Ollama, "mock-text"),
                Arc::new(MockProvider::fixed("unused").with_id("mock-images")),
                ProviderSpec::new(ProviderKind::OpenAi, "mock-image"),
            );
            ExecCtx::builder(PipelineConfig::default()).providers(providers)
        }
    };
    let ctx = builder.event_handler(handler).build()?;

    let pipeline = Pipeline::builder(ctx).build();
    let report = pipeline
        .execute(InputRef::path(&input), OutputKind::Markdown)
        .await;

    for err in &report.errors {
        eprintln!("  {}", err);
    }
    let artifact = report.into_result()?;
    println!("\nWrote {}", artifact.path.display());
    Ok(())
}
