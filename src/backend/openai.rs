//! Provider for OpenAI-compatible APIs.
//!
//! [`OpenAiProvider`] covers OpenAI itself plus compatible servers (vLLM,
//! LM Studio, Together AI, Groq, Ollama's `/v1/`).
//!
//! Text: `/v1/chat/completions`. Images: `/v1/images/generations`, asking for
//! `b64_json` so the pipeline owns the bytes.

use super::{post_json, GenerationRequest, GenerationResult, ImageData, Provider, Usage};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Default public endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Provider for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use doc_pipeline::backend::OpenAiProvider;
///
/// let provider = OpenAiProvider::new(reqwest::Client::new(), "https://api.openai.com")
///     .with_api_key("sk-...");
/// assert!(provider.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.len() > 6 {
                        format!("{}***", &k[..6])
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        let trimmed = base.trim_end_matches('/');
        Self {
            client,
            base_url: trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string(),
            api_key: None,
        }
    }

    /// Set the API key, sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    fn build_chat_body(request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                messages.push(json!({"role": "system", "content": sys}));
            }
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
        });
        if request.params.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    /// Build the request body for `/v1/images/generations`.
    fn build_image_body(request: &GenerationRequest) -> Value {
        json!({
            "model": request.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.params.size.as_deref().unwrap_or("1024x1024"),
            "response_format": "b64_json",
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    fn extract_usage(json_resp: &Value) -> Usage {
        let usage = json_resp.get("usage");
        Usage {
            input_tokens: usage
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(Value::as_u64),
            output_tokens: usage
                .and_then(|u| u.get("completion_tokens"))
                .and_then(Value::as_u64),
        }
    }

    /// Pull the message text out of a chat completion.
    ///
    /// `finish_reason == "content_filter"` is reported as an unsuccessful result.
    fn parse_chat_response(json_resp: &Value) -> Result<GenerationResult> {
        let choice = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| PipelineError::MalformedOutput("completion has no choices".into()))?;

        let filtered = choice.get("finish_reason").and_then(Value::as_str) == Some("content_filter");
        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(GenerationResult {
            usage: Self::extract_usage(json_resp),
            success: !filtered,
            ..GenerationResult::text(text)
        })
    }

    fn parse_image_response(json_resp: &Value) -> Result<GenerationResult> {
        let first = json_resp
            .get("data")
            .and_then(|d| d.get(0))
            .ok_or_else(|| PipelineError::MalformedOutput("image response has no data".into()))?;

        if let Some(b64) = first.get("b64_json").and_then(Value::as_str) {
            return Ok(GenerationResult::image(ImageData::Base64 {
                data: b64.to_string(),
                mime: "image/png".to_string(),
            }));
        }
        if let Some(url) = first.get("url").and_then(Value::as_str) {
            return Ok(GenerationResult::image(ImageData::Url(url.to_string())));
        }
        Err(PipelineError::MalformedOutput(
            "image response has neither b64_json nor url".into(),
        ))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_chat_body(request);
        let req = self.authorized(self.client.post(&url).json(&body));
        let json_resp = post_json(self.id(), req).await?;
        Self::parse_chat_response(&json_resp)
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let url = format!("{}/v1/images/generations", self.base_url);
        let body = Self::build_image_body(request);
        let req = self.authorized(self.client.post(&url).json(&body));
        let json_resp = post_json(self.id(), req).await?;
        Self::parse_image_response(&json_resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GeneratedPayload, GenerationParams};

    #[test]
    fn test_base_url_strips_v1() {
        let p = OpenAiProvider::new(Client::new(), "https://api.openai.com/v1/");
        assert_eq!(p.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_chat_body_json_mode() {
        let request = GenerationRequest::new("gpt-4o-mini", "hi")
            .with_system_prompt("sys")
            .with_params(GenerationParams {
                json_mode: true,
                ..GenerationParams::default()
            });
        let body = OpenAiProvider::build_chat_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_image_body_default_size() {
        let body = OpenAiProvider::build_image_body(&GenerationRequest::new("dall-e-3", "a fox"));
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["response_format"], "b64_json");
    }

    #[test]
    fn test_parse_chat_response() {
        let resp = json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        });
        let result = OpenAiProvider::parse_chat_response(&resp).unwrap();
        assert!(result.success);
        assert_eq!(result.usage.output_tokens, Some(1));
        assert_eq!(result.into_text().unwrap(), "hello");
    }

    #[test]
    fn test_parse_chat_response_content_filter() {
        let resp = json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]
        });
        let result = OpenAiProvider::parse_chat_response(&resp).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_parse_image_response_b64() {
        let resp = json!({"data": [{"b64_json": "aGVsbG8="}]});
        let result = OpenAiProvider::parse_image_response(&resp).unwrap();
        assert!(matches!(
            result.payload,
            GeneratedPayload::Image(ImageData::Base64 { .. })
        ));
    }

    #[test]
    fn test_parse_image_response_empty() {
        let resp = json!({"data": []});
        assert!(OpenAiProvider::parse_image_response(&resp).is_err());
    }

    #[test]
    fn test_debug_masks_key() {
        let p = OpenAiProvider::new(Client::new(), DEFAULT_OPENAI_URL).with_api_key("sk-abcdefghijk");
        let dbg = format!("{:?}", p);
        assert!(dbg.contains("sk-abc***"));
        assert!(!dbg.contains("defghijk"));
    }
}
