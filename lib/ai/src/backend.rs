//! Model provider abstraction.
//!
//! Provides a unified interface for chat-style model APIs.

use crate::error::ModelError;
use async_trait::async_trait;
use flowloom_conversation::Message;
use serde::{Deserialize, Serialize};

/// An image passed to vision-capable models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelImage {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded image bytes, or an `http(s)` URL.
    pub data: String,
}

impl ModelImage {
    /// Returns the image as a URL: either the original URL or a `data:` URL.
    #[must_use]
    pub fn as_url(&self) -> String {
        if self.data.starts_with("http://")
            || self.data.starts_with("https://")
            || self.data.starts_with("data:")
        {
            self.data.clone()
        } else {
            format!("data:{};base64,{}", self.mime_type, self.data)
        }
    }
}

/// A request to a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model override; the provider's default is used when absent.
    pub model: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Prior conversation, oldest first.
    pub context: Vec<Message>,
    /// Image for vision requests.
    pub image: Option<ModelImage>,
    /// Temperature for sampling (0.0 - 2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl ModelRequest {
    /// Creates a new simple request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Adds context messages.
    #[must_use]
    pub fn with_context(mut self, context: Vec<Message>) -> Self {
        self.context = context;
        self
    }

    /// Attaches an image.
    #[must_use]
    pub fn with_image(mut self, image: ModelImage) -> Self {
        self.image = Some(image);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A response from a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated text.
    pub content: String,
    /// Model that generated the response.
    pub model: String,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the model call fails.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Returns a short provider name for logs and error messages.
    fn name(&self) -> &str;

    /// Returns the model used when a request does not name one.
    fn default_model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_request_builder() {
        let request = ModelRequest::new("Hello, world!")
            .with_system("You are a helpful assistant.")
            .with_temperature(0.7)
            .with_max_tokens(100)
            .with_context(vec![Message::user("earlier")]);

        assert_eq!(request.prompt, "Hello, world!");
        assert_eq!(
            request.system,
            Some("You are a helpful assistant.".to_string())
        );
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(100));
        assert_eq!(request.context.len(), 1);
        assert!(request.model.is_none());
    }

    #[test]
    fn image_url_wraps_base64() {
        let image = ModelImage {
            mime_type: "image/png".to_string(),
            data: "iVBORw0".to_string(),
        };
        assert_eq!(image.as_url(), "data:image/png;base64,iVBORw0");

        let image = ModelImage {
            mime_type: "image/jpeg".to_string(),
            data: "https://example.test/cat.jpg".to_string(),
        };
        assert_eq!(image.as_url(), "https://example.test/cat.jpg");
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }
}
