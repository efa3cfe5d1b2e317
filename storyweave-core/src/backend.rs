//! The generation capability the engine consumes.
//!
//! Everything the engine asks of a model goes through [`GenerationBackend`]:
//! structured output, free text, and images. [`ClaudeBackend`] is the
//! production adapter; tests use [`crate::testing::MockBackend`].

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::shape::Shape;
use async_trait::async_trait;
use claude::{Claude, Message, Request, StopReason, Tool};
use imagegen::ImageClient;
use serde_json::{json, Value};

pub use imagegen::Size as ImageSize;

/// Name of the tool used to force structured replies.
const RESPOND_TOOL: &str = "respond";

/// Key used to wrap non-object shapes, since tool inputs must be objects.
const WRAPPED_KEY: &str = "value";

/// A request to a text model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Short label for what the request is for (`"premise"`, `"scene"`).
    /// Used in logs and by test backends for routing.
    pub purpose: String,
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

impl Prompt {
    pub fn new(purpose: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            system: None,
            user: user.into(),
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// What a backend returned for a structured request.
///
/// Backends that cannot guarantee structured output return the raw text so
/// the generator can attempt recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredReply {
    Value(Value),
    Text(String),
}

/// Text and image generation capabilities.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Ask for a value matching `shape`. Conformance is checked by the caller.
    async fn generate_structured(
        &self,
        prompt: &Prompt,
        shape: &Shape,
    ) -> Result<StructuredReply, GenerationError>;

    /// Ask for free text.
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError>;

    /// Ask for an image; returns encoded image bytes.
    async fn generate_image(
        &self,
        prompt: &str,
        size: ImageSize,
    ) -> Result<Vec<u8>, GenerationError>;
}

/// Anthropic for text, OpenAI Images for pictures.
///
/// Either half may be missing (no API key); calls to a missing half fail
/// with [`GenerationError::Unavailable`], which the generator treats as
/// final and answers with a fallback.
#[derive(Clone)]
pub struct ClaudeBackend {
    text: Option<Claude>,
    images: Option<ImageClient>,
}

impl ClaudeBackend {
    pub fn new(text: Option<Claude>, images: Option<ImageClient>) -> Self {
        Self { text, images }
    }

    /// Build clients from the keys and model names in `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        let text = config.anthropic_api_key.as_ref().map(|key| {
            Claude::with_timeout(key.clone(), config.request_timeout)
                .with_model(config.text_model.clone())
        });
        let images = config.openai_api_key.as_ref().map(|key| {
            ImageClient::with_timeout(key.clone(), config.request_timeout)
                .with_model(config.image_model.clone())
        });

        if text.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY not set; text generation will use fallbacks");
        }
        if images.is_none() {
            tracing::warn!("OPENAI_API_KEY not set; images will not be generated");
        }

        Self { text, images }
    }

    fn text_client(&self) -> Result<&Claude, GenerationError> {
        self.text
            .as_ref()
            .ok_or_else(|| GenerationError::Unavailable("no text model configured".into()))
    }

    fn request(prompt: &Prompt) -> Request {
        let mut request =
            Request::new(vec![Message::user(prompt.user.clone())]).with_max_tokens(prompt.max_tokens);
        if let Some(system) = &prompt.system {
            request = request.with_system(system.clone());
        }
        if let Some(temperature) = prompt.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

/// Tool input schemas must be objects; wrap anything else under one key.
fn tool_schema(shape: &Shape) -> (Value, bool) {
    match shape {
        Shape::Record { .. } | Shape::Map { .. } => (shape.to_json_schema(), false),
        _ => (
            json!({
                "type": "object",
                "properties": { WRAPPED_KEY: shape.to_json_schema() },
                "required": [WRAPPED_KEY],
            }),
            true,
        ),
    }
}

#[async_trait]
impl GenerationBackend for ClaudeBackend {
    async fn generate_structured(
        &self,
        prompt: &Prompt,
        shape: &Shape,
    ) -> Result<StructuredReply, GenerationError> {
        let client = self.text_client()?;
        let (input_schema, wrapped) = tool_schema(shape);
        let tool = Tool {
            name: RESPOND_TOOL.to_string(),
            description: "Record your answer in the required structure.".to_string(),
            input_schema,
        };

        let reply = client.complete_with_tool(Self::request(prompt), tool).await?;
        Ok(match reply {
            Value::String(text) => StructuredReply::Text(text),
            Value::Object(mut object) if wrapped => {
                StructuredReply::Value(object.remove(WRAPPED_KEY).unwrap_or(Value::Null))
            }
            other => StructuredReply::Value(other),
        })
    }

    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let client = self.text_client()?;
        let response = client.complete(Self::request(prompt)).await?;
        tracing::debug!(
            purpose = %prompt.purpose,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Text generated"
        );
        if response.stop_reason == StopReason::MaxTokens {
            tracing::warn!(purpose = %prompt.purpose, "Reply cut off at the token limit");
        }
        Ok(response.text())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        size: ImageSize,
    ) -> Result<Vec<u8>, GenerationError> {
        let client = self
            .images
            .as_ref()
            .ok_or_else(|| GenerationError::Unavailable("no image model configured".into()))?;
        Ok(client.generate(prompt, size).await?)
    }
}
