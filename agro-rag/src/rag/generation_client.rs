//! Text generation for answers.
//!
//! This module handles:
//! - The [`GenerationService`] seam used by the retrieval engine
//! - Building `generateContent` request bodies
//! - Reading the answer text out of a Gemini response

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::settings::RagSettings;

/// An opaque prompt → text completion service
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build a single-turn `generateContent` request body
pub fn build_generate_request_body(prompt: &str) -> Value {
    json!({
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": prompt }],
            }
        ],
    })
}

/// Concatenate the text parts of the first candidate.
///
/// A response without candidates (for example one blocked by safety
/// filters) is an error that carries the block reason when present.
pub fn parse_generate_response(body: &Value) -> Result<String> {
    let Some(candidate) = body["candidates"].as_array().and_then(|c| c.first()) else {
        let reason = body["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates returned");
        return Err(RagError::Generation(reason.to_string()));
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish = candidate["finishReason"].as_str().unwrap_or("empty response");
        return Err(RagError::Generation(format!("no answer text ({})", finish)));
    }
    Ok(text)
}

/// Answers through the Gemini `generateContent` endpoint
#[derive(Clone)]
pub struct GeminiGenerationService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiGenerationService {
    pub fn new(api_base: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/{}:generateContent", api_base.trim_end_matches('/'), model);
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn from_settings(settings: &RagSettings) -> Result<Self> {
        Self::new(
            &settings.api_base,
            &settings.generation_model,
            settings.resolve_api_key(),
            settings.generation_timeout(),
        )
    }
}

#[async_trait]
impl GenerationService for GeminiGenerationService {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(RagError::Generation("no API key configured".to_string()));
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&build_generate_request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::Generation(format!("request failed ({}): {}", status, body)));
        }

        let body: Value = response.json().await?;
        parse_generate_response(&body)
    }
}
