//! Google Gemini `generateContent`.
//!
//! One candidate per call, scored [`NO_CONFIDENCE`]. Safety filters are
//! disabled for every harm category: Lean goals trip them spuriously.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::{Generator, RawCompletion};
use crate::candidate::NO_CONFIDENCE;
use crate::errors::AdapterError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini adapter configuration.
pub struct GeminiConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct Gemini {
    path: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    transport: HttpTransport,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    candidate_count: u32,
    max_output_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl Gemini {
    pub fn new(config: GeminiConfig) -> Result<Self, TransportError> {
        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport =
            HttpTransport::new("gemini", &base_url, Some(config.timeout), config.retry)?
                .with_secret_header("x-goog-api-key", &config.api_key)?;

        Ok(Self {
            path: format!("/v1beta/models/{}:generateContent", config.model),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            transport,
        })
    }
}

#[async_trait]
impl Generator for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
        let request = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                candidate_count: 1,
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        };

        let response: GenerateContentResponse =
            self.transport.post_json(&self.path, &request).await?;
        let text = first_candidate_text(response)?;

        Ok(vec![RawCompletion {
            text,
            score: NO_CONFIDENCE,
        }])
    }
}

fn first_candidate_text(response: GenerateContentResponse) -> Result<String, AdapterError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(AdapterError::Extraction(format!("gemini: {reason}")));
    };

    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default())
}
