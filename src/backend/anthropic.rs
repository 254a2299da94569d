//! Anthropic Messages API.
//!
//! The API returns a single completion and no token probabilities, so each
//! call yields one candidate scored [`NO_CONFIDENCE`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::{Generator, RawCompletion};
use crate::candidate::NO_CONFIDENCE;
use crate::errors::AdapterError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic adapter configuration.
pub struct AnthropicConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: String,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct Anthropic {
    model: String,
    temperature: f64,
    top_p: Option<f64>,
    max_tokens: u32,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl Anthropic {
    pub fn new(config: AnthropicConfig) -> Result<Self, TransportError> {
        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport =
            HttpTransport::new("anthropic", &base_url, Some(config.timeout), config.retry)?
                .with_secret_header("x-api-key", &config.api_key)?
                .with_header("anthropic-version", API_VERSION)?;

        Ok(Self {
            model: config.model,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            transport,
        })
    }
}

#[async_trait]
impl Generator for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response: MessagesResponse = self.transport.post_json("/v1/messages", &request).await?;

        Ok(vec![RawCompletion {
            text: response_text(response),
            score: NO_CONFIDENCE,
        }])
    }
}

/// Concatenate the text blocks of a response.
fn response_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect()
}
