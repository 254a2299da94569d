//! OpenAI chat completions.
//!
//! Requests `n` choices with token log-probabilities. Each choice is scored
//! with the geometric-mean token likelihood `exp(mean(logprob))`; choices
//! that come back without log-probabilities get [`NO_CONFIDENCE`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::{Generator, RawCompletion};
use crate::candidate::{mean_token_likelihood, NO_CONFIDENCE};
use crate::errors::AdapterError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI adapter configuration.
pub struct OpenAiConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub num_candidates: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct OpenAi {
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    num_candidates: u32,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    n: u32,
    frequency_penalty: f64,
    presence_penalty: f64,
    logprobs: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    index: u32,
    message: ChoiceMessage,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Option<Vec<TokenLogprob>>,
}

#[derive(Deserialize)]
struct TokenLogprob {
    logprob: f64,
}

impl OpenAi {
    pub fn new(config: OpenAiConfig) -> Result<Self, TransportError> {
        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport =
            HttpTransport::new("openai", &base_url, Some(config.timeout), config.retry)?
                .with_secret_header("authorization", &format!("Bearer {}", config.api_key))?;

        Ok(Self {
            model: config.model,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            num_candidates: config.num_candidates.max(1),
            transport,
        })
    }
}

#[async_trait]
impl Generator for OpenAi {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            n: self.num_candidates,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            logprobs: true,
        };

        let mut response: ChatResponse = self
            .transport
            .post_json("/v1/chat/completions", &request)
            .await?;
        response.choices.sort_by_key(|c| c.index);

        Ok(response.choices.into_iter().map(score_choice).collect())
    }
}

fn score_choice(choice: Choice) -> RawCompletion {
    let logprobs: Vec<f64> = choice
        .logprobs
        .and_then(|lp| lp.content)
        .unwrap_or_default()
        .iter()
        .map(|t| t.logprob)
        .collect();

    RawCompletion {
        text: choice.message.content.unwrap_or_default(),
        score: mean_token_likelihood(&logprobs).unwrap_or(NO_CONFIDENCE),
    }
}
