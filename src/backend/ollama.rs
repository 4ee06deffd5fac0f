//! Provider for Ollama's native API.
//!
//! [`OllamaProvider`] translates normalized [`GenerationRequest`]s into
//! Ollama's `/api/generate` endpoint. Ollama serves text only; image
//! requests fall through to the trait's default and fail as a configuration
//! error.

use super::{post_json, GenerationRequest, GenerationResult, Provider, Usage};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Default local endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Provider for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the JSON body for `/api/generate`.
    fn build_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.params.temperature,
                "num_predict": request.params.max_tokens,
            },
        });
        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                body["system"] = json!(sys);
            }
        }
        if request.params.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    /// Extract token counts from an Ollama response.
    fn extract_usage(json_resp: &Value) -> Usage {
        Usage {
            input_tokens: json_resp.get("prompt_eval_count").and_then(Value::as_u64),
            output_tokens: json_resp.get("eval_count").and_then(Value::as_u64),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let url = format!("{}/api/generate", self.base_url);
        let body = Self::build_body(request);
        let json_resp = post_json(self.id(), self.client.post(&url).json(&body)).await?;

        let text = json_resp
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::MalformedOutput("ollama response has no 'response' field".into())
            })?
            .to_string();

        Ok(GenerationResult {
            usage: Self::extract_usage(&json_resp),
            ..GenerationResult::text(text)
        })
    }
}
