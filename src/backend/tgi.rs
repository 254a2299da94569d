//! Local transformer checkpoints served by a text-generation-inference
//! compatible server (`POST /generate`).
//!
//! The server returns one sequence per request, so a `complete` call fans
//! `num_candidates` requests out, at most `parallelism` in flight, and keeps
//! them in request order. Each sequence is scored `exp(mean(token logprob))`.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::{Generator, RawCompletion};
use crate::candidate::{mean_token_likelihood, NO_CONFIDENCE};
use crate::errors::AdapterError;

/// Model architecture behind the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    /// Causal decoder; generation may continue from a target prefix.
    #[default]
    DecoderOnly,
    /// Seq2seq model; the decoder cannot be seeded with a prefix.
    EncoderDecoder,
}

/// Local transformer adapter configuration.
pub struct TgiConfig {
    pub model: String,
    pub base_url: String,
    pub architecture: Architecture,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub num_candidates: u32,
    pub parallelism: usize,
}

pub struct Tgi {
    architecture: Architecture,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    num_candidates: u32,
    parallelism: usize,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Parameters {
    do_sample: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    max_new_tokens: u32,
    details: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    generated_text: String,
    #[serde(default)]
    details: Option<Details>,
}

#[derive(Deserialize)]
struct Details {
    #[serde(default)]
    tokens: Vec<Token>,
}

#[derive(Deserialize)]
struct Token {
    logprob: f64,
}

impl Tgi {
    pub fn new(config: TgiConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new("tgi", &config.base_url, None, RetryPolicy::none())?;
        info!(
            model = %config.model,
            architecture = ?config.architecture,
            base_url = transport.base_url(),
            "using local transformer server"
        );

        Ok(Self {
            architecture: config.architecture,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            num_candidates: config.num_candidates.max(1),
            parallelism: config.parallelism.max(1),
            transport,
        })
    }

    /// Greedy decoding is deterministic, so one request is enough.
    fn parameters(&self) -> (Parameters, u32) {
        let sampling = self.temperature > 0.0;
        let parameters = Parameters {
            do_sample: sampling,
            temperature: sampling.then_some(self.temperature),
            top_p: (sampling && self.top_p < 1.0).then_some(self.top_p),
            max_new_tokens: self.max_tokens,
            details: true,
        };
        let requests = if sampling { self.num_candidates } else { 1 };
        (parameters, requests)
    }
}

#[async_trait]
impl Generator for Tgi {
    fn name(&self) -> &str {
        "tgi"
    }

    fn accepts_prefix(&self) -> bool {
        self.architecture == Architecture::DecoderOnly
    }

    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
        let (parameters, requests) = self.parameters();
        let request = GenerateRequest {
            inputs: prompt,
            parameters,
        };

        let responses: Vec<GenerateResponse> = stream::iter(0..requests)
            .map(|_| self.transport.post_json::<_, GenerateResponse>("/generate", &request))
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        Ok(responses.into_iter().map(score_response).collect())
    }
}

fn score_response(response: GenerateResponse) -> RawCompletion {
    let logprobs: Vec<f64> = response
        .details
        .map(|d| d.tokens.into_iter().map(|t| t.logprob).collect())
        .unwrap_or_default();

    RawCompletion {
        text: response.generated_text,
        score: mean_token_likelihood(&logprobs).unwrap_or(NO_CONFIDENCE),
    }
}
