//! OpenAI-compatible chat completions provider.
//!
//! Works with OpenAI, Ollama, vLLM, Groq, OpenRouter and anything else that
//! speaks `/v1/chat/completions`.

use crate::backend::{ModelProvider, ModelRequest, ModelResponse, TokenUsage};
use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument, warn};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Base URL up to and including the version segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key sent as a bearer token, if required.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
        }
    }
}

/// Model provider for OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleProvider {
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Builds the chat completions request body.
fn build_body(request: &ModelRequest, default_model: &str) -> JsonValue {
    let mut messages = Vec::with_capacity(request.context.len() + 2);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.context {
        messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
    }
    let user_content = match &request.image {
        Some(image) => json!([
            { "type": "text", "text": request.prompt },
            { "type": "image_url", "image_url": { "url": image.as_url() } },
        ]),
        None => json!(request.prompt),
    };
    messages.push(json!({ "role": "user", "content": user_content }));

    let mut body = json!({
        "model": request.model.as_deref().unwrap_or(default_model),
        "messages": messages,
        "stream": false,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

fn parse_response(raw: &[u8], fallback_model: &str) -> Result<ModelResponse, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_slice(raw).map_err(|e| ModelError::ResponseParseFailed {
            reason: e.to_string(),
        })?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ModelError::ResponseParseFailed {
            reason: "response contained no choices".to_string(),
        })?;
    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok(ModelResponse {
        content,
        model: parsed.model.unwrap_or_else(|| fallback_model.to_string()),
        usage,
    })
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    #[instrument(skip(self, request), fields(provider = "openai-compatible"))]
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        if request.prompt.trim().is_empty() && request.image.is_none() {
            return Err(ModelError::InvalidRequest {
                reason: "prompt is empty".to_string(),
            });
        }

        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let body = build_body(request, &self.config.model);
        let mut builder = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::ProviderUnavailable {
                    provider: self.config.base_url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            warn!(?retry_after_secs, "model provider rate limited");
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Unauthorized {
                provider: self.config.base_url.clone(),
            });
        }

        let raw = response
            .bytes()
            .await
            .map_err(|e| ModelError::RequestFailed {
                reason: e.to_string(),
            })?;
        if !status.is_success() {
            return Err(ModelError::RequestFailed {
                reason: format!("HTTP {}: {}", status.as_u16(), String::from_utf8_lossy(&raw)),
            });
        }

        let parsed = parse_response(&raw, model)?;
        debug!(
            model = %parsed.model,
            tokens = parsed.usage.total(),
            "model response received"
        );
        Ok(parsed)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ModelImage;
    use flowloom_conversation::Message;

    #[test]
    fn body_orders_system_context_then_prompt() {
        let request = ModelRequest::new("What next?")
            .with_system("Be terse.")
            .with_context(vec![Message::user("hi"), Message::assistant("hello")])
            .with_max_tokens(64);
        let body = build_body(&request, "small-model");

        assert_eq!(body["model"], "small-model");
        assert_eq!(body["max_tokens"], 64);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "What next?");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn body_carries_image_parts_for_vision() {
        let request = ModelRequest::new("Describe").with_model("vision-model").with_image(ModelImage {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        });
        let body = build_body(&request, "default");

        assert_eq!(body["model"], "vision-model");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "Describe");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn parse_extracts_first_choice_and_usage() {
        let raw = br#"{
            "model": "gpt-test",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3}
        }"#;
        let response = parse_response(raw, "fallback").unwrap();
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.model, "gpt-test");
        assert_eq!(response.usage.total(), 10);
    }

    #[test]
    fn parse_rejects_empty_choices() {
        let err = parse_response(br#"{"choices": []}"#, "m").unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_sending() {
        let provider = OpenAiCompatibleProvider::new(OpenAiConfig::default());
        let err = provider.generate(&ModelRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidRequest { .. }));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: OpenAiConfig = serde_json::from_str(r#"{"model": "llama3"}"#).unwrap();
        assert_eq!(config.model, "llama3");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.api_key.is_none());
    }
}
