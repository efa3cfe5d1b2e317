//! Minimal OpenAI Images API client.
//!
//! Submits a prompt to the image generation endpoint, then downloads the
//! returned image so callers always receive raw bytes.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "dall-e-3";

/// Errors that can occur when generating images.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no image")]
    Empty,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Parse(_) | Error::Empty => true,
            Error::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Error::NoApiKey | Error::Config(_) => false,
        }
    }
}

/// Output dimensions accepted by the images endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const SQUARE: Size = Size {
        width: 1024,
        height: 1024,
    };
    pub const LANDSCAPE: Size = Size {
        width: 1792,
        height: 1024,
    };

    fn as_param(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// OpenAI Images API client.
#[derive(Clone)]
pub struct ImageClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ImageClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(180))
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a client from the OPENAI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate one image and return its encoded bytes (PNG from this API).
    pub async fn generate(&self, prompt: &str, size: Size) -> Result<Vec<u8>, Error> {
        let request = ApiRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: size.as_param(),
            response_format: "url",
        };

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let url = api_response
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or(Error::Empty)?;

        self.download(&url).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Api {
                status: response.status().as_u16(),
                message: format!("download of {url} failed"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::Empty);
        }
        Ok(bytes.to_vec())
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_param() {
        assert_eq!(Size::SQUARE.as_param(), "1024x1024");
        assert_eq!(Size::LANDSCAPE.as_param(), "1792x1024");
    }

    #[test]
    fn test_client_builder() {
        let client = ImageClient::new("k")
            .with_model("gpt-image-1")
            .with_base_url("http://localhost:9000/v1/");
        assert_eq!(client.model(), "gpt-image-1");
        assert_eq!(client.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_response_without_url() {
        let parsed: ApiResponse =
            serde_json::from_str(r#"{"data":[{"revised_prompt":"x"}]}"#).unwrap();
        assert!(parsed.data[0].url.is_none());
    }

    #[test]
    fn test_error_retryability() {
        assert!(Error::Empty.is_retryable());
        assert!(!Error::Api { status: 400, message: "content policy".into() }.is_retryable());
    }
}
