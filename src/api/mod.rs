//! Thin client for the OpenAI-compatible AI backend.
//!
//! Summaries, keywords and sentiment degrade to a neutral or error string —
//! an AI outage must never take the chat session down with it. Image
//! generation is the one call that returns bytes, and its URL download is
//! bounded by a timeout so a stalled CDN cannot wedge a worker forever.

pub mod models;

use std::env;
use std::fmt;

use crate::api::models::{ChatMessage, ChatRequest, ChatResponse, ImageRequest, ImageResponse};
use crate::core::config::Config;
use crate::core::constants::{AI_REQUEST_TIMEOUT, IMAGE_DOWNLOAD_TIMEOUT};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SUMMARY_PROMPT: &str = "Summarize the following chat conversation briefly.";
const KEYWORDS_PROMPT: &str =
    "Extract 5 main keywords from the following text, separated by commas.";
const SENTIMENT_PROMPT: &str = "Analyze the sentiment of this text. Return primarily an Emoji \
representing the emotion (e.g., a smiley, angry, sad or neutral face) followed by a one-word label.";

/// AI or image backend failure, surfaced as an inline notice and nothing more.
#[derive(Debug)]
pub struct ExternalServiceError(pub String);

impl fmt::Display for ExternalServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ExternalServiceError {}

impl From<reqwest::Error> for ExternalServiceError {
    fn from(e: reqwest::Error) -> Self {
        ExternalServiceError(e.to_string())
    }
}

pub struct AiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl AiClient {
    /// Build from config with environment fallback (`OPENAI_API_KEY`,
    /// `OPENAI_BASE_URL`). Without a key the client stays constructed but
    /// disabled, and every helper degrades to its neutral string.
    pub fn from_config(config: &Config, model_override: Option<String>) -> Self {
        let base_url = config
            .ai_base_url
            .clone()
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model_override
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            client: Self::http_client(),
            api_key: config
                .api_key
                .clone()
                .or_else(|| env::var("OPENAI_API_KEY").ok()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// A client with no backend at all; every call degrades. Used when AI
    /// features are switched off and in tests.
    pub fn disabled() -> Self {
        Self {
            client: Self::http_client(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Every request carries a bounded timeout; a stalled backend fails the
    /// call instead of wedging its caller.
    fn http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(AI_REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client")
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, ExternalServiceError> {
        let Some(api_key) = &self.api_key else {
            return Err(ExternalServiceError("AI API key not configured".into()));
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user.into(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExternalServiceError(format!(
                "AI request failed with status {status}: {error_text}"
            )));
        }

        let parsed = response.json::<ChatResponse>().await?;
        parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ExternalServiceError("AI response was empty".into()))
    }

    pub async fn summarize(&self, text: &str) -> String {
        self.chat(SUMMARY_PROMPT, text)
            .await
            .unwrap_or_else(|e| format!("AI Error: {e}"))
    }

    pub async fn keywords(&self, text: &str) -> String {
        self.chat(KEYWORDS_PROMPT, text)
            .await
            .unwrap_or_else(|e| format!("AI Error: {e}"))
    }

    /// Sentiment annotation; neutral placeholder when the backend is
    /// unavailable, matching the inline-display contract.
    pub async fn sentiment(&self, text: &str) -> String {
        self.chat(SENTIMENT_PROMPT, text)
            .await
            .unwrap_or_else(|_| "Neutral (AI N/A)".to_string())
    }

    /// Generate an image and download the resulting bytes.
    ///
    /// Tries the primary image model first, falling back to the smaller one,
    /// the download itself is bounded by [`IMAGE_DOWNLOAD_TIMEOUT`].
    pub async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ExternalServiceError> {
        let url = match self.request_image_url("dall-e-3", "1024x1024", prompt).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("primary image model failed, retrying smaller: {e}");
                self.request_image_url("dall-e-2", "512x512", prompt).await?
            }
        };

        let response = self
            .client
            .get(&url)
            .timeout(IMAGE_DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ExternalServiceError(format!(
                "Failed to download image (status {})",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn request_image_url(
        &self,
        model: &str,
        size: &str,
        prompt: &str,
    ) -> Result<String, ExternalServiceError> {
        let Some(api_key) = &self.api_key else {
            return Err(ExternalServiceError("AI API key not configured".into()));
        };

        let request = ImageRequest {
            model: model.into(),
            prompt: prompt.into(),
            n: 1,
            size: size.into(),
        };
        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ExternalServiceError(format!(
                "image generation failed with status {status}"
            )));
        }

        let parsed = response.json::<ImageResponse>().await?;
        parsed
            .data
            .first()
            .and_then(|d| d.url.clone())
            .ok_or_else(|| ExternalServiceError("image response carried no URL".into()))
    }
}
