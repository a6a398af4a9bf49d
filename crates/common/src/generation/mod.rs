//! Text generation service abstraction
//!
//! Provides:
//! - `Generator`, a prompt (+ optional image) to text contract
//! - An OpenAI-compatible chat completions client with retry
//! - A static generator for offline runs

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// An image attached to a generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageInput {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    /// Parse either a `data:<mime>;base64,<payload>` URL or bare base64 (assumed PNG)
    pub fn from_base64_payload(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        let (mime, encoded) = match payload.strip_prefix("data:") {
            Some(rest) => {
                let (header, body) = rest.split_once(',').ok_or_else(|| AppError::Validation {
                    message: "malformed data URL".to_string(),
                    field: Some("process_flow".to_string()),
                })?;
                let mime = header.strip_suffix(";base64").unwrap_or(header);
                let mime = if mime.is_empty() { "image/png" } else { mime };
                (mime.to_string(), body)
            }
            None => ("image/png".to_string(), payload),
        };

        let data = STANDARD.decode(encoded).map_err(|e| AppError::Validation {
            message: format!("invalid base64 image: {}", e),
            field: Some("process_flow".to_string()),
        })?;

        Ok(Self { mime, data })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }
}

/// Trait for text generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for a prompt, optionally grounded on an image
    async fn generate(&self, prompt: &str, image: Option<&ImageInput>) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
    api_key: String,
}

impl ChatCompletionGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    fn build_request(&self, prompt: &str, image: Option<&ImageInput>) -> ChatRequest {
        let content = match image {
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.to_data_url(),
                    },
                },
            ]),
            None => MessageContent::Text(prompt.to_string()),
        };

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn call_once(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::GenerationFailure {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationFailure {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::GenerationFailure {
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok(completion_text(result))
    }
}

/// First choice's content; a missing or blank completion reads as empty text
fn completion_text(response: ChatResponse) -> String {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        debug!("Generation returned an empty completion");
        String::new()
    } else {
        text
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn generate(&self, prompt: &str, image: Option<&ImageInput>) -> Result<String> {
        let request = self.build_request(prompt, image);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(Duration::from_secs(self.config.timeout_secs * 2)),
            ..Default::default()
        };

        let max_retries = self.config.max_retries.max(1);
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let request = &request;
        let start = Instant::now();

        let result = retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.call_once(request).await {
                Ok(text) => Ok(text),
                Err(e) if attempt >= max_retries => Err(backoff::Error::permanent(e)),
                Err(e) => {
                    warn!(attempt, max_retries, error = %e, "Generation call failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await;

        metrics::record_generation(
            start.elapsed().as_secs_f64(),
            &self.config.model,
            result.is_ok(),
        );
        debug!(
            model = %self.config.model,
            attempts = attempts.load(Ordering::Relaxed),
            "Generation finished"
        );
        result
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Returns a fixed reply for every prompt
pub struct StaticGenerator {
    reply: String,
}

impl StaticGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn generate(&self, _prompt: &str, _image: Option<&ImageInput>) -> Result<String> {
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "generation.api_key is required for the openai provider".to_string(),
                })?;
            Ok(Arc::new(ChatCompletionGenerator::new(config, key)?))
        }
        "static" => Ok(Arc::new(StaticGenerator::new(
            "Content generation is disabled in this deployment.",
        ))),
        other => Err(AppError::Configuration {
            message: format!("unknown generation provider: {}", other),
        }),
    }
}
