//! vLLM batched inference engine, through its OpenAI-compatible completions
//! endpoint.
//!
//! A single request asks for `n` samples; vLLM batches them internally.
//! Samples are scored `exp(mean(token_logprobs))`, the length-normalized
//! likelihood of the generated sequence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::{Generator, RawCompletion};
use crate::candidate::{mean_token_likelihood, NO_CONFIDENCE};
use crate::errors::AdapterError;

/// vLLM adapter configuration.
pub struct VllmConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub num_candidates: u32,
    /// Stop sequences, e.g. the chat end-of-turn marker.
    pub stop: Vec<String>,
}

pub struct Vllm {
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    num_candidates: u32,
    stop: Vec<String>,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
    logprobs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    index: u32,
    text: String,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    token_logprobs: Vec<Option<f64>>,
}

impl Vllm {
    /// Local engines are never retried; a failed call propagates.
    pub fn new(config: VllmConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new("vllm", &config.base_url, None, RetryPolicy::none())?;
        info!(model = %config.model, base_url = transport.base_url(), "using vllm engine");

        Ok(Self {
            model: config.model,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            num_candidates: config.num_candidates.max(1),
            stop: config.stop,
            transport,
        })
    }
}

#[async_trait]
impl Generator for Vllm {
    fn name(&self) -> &str {
        "vllm"
    }

    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            n: self.num_candidates,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            logprobs: 1,
            stop: (!self.stop.is_empty()).then_some(self.stop.as_slice()),
        };

        let mut response: CompletionResponse =
            self.transport.post_json("/v1/completions", &request).await?;
        response.choices.sort_by_key(|c| c.index);

        Ok(response.choices.into_iter().map(score_choice).collect())
    }
}

fn score_choice(choice: Choice) -> RawCompletion {
    // The first token of a sequence may come back as null.
    let logprobs: Vec<f64> = choice
        .logprobs
        .map(|lp| lp.token_logprobs.into_iter().flatten().collect())
        .unwrap_or_default();

    RawCompletion {
        text: choice.text,
        score: mean_token_likelihood(&logprobs).unwrap_or(NO_CONFIDENCE),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::backend::testing::serve;

    #[test]
    fn test_stop_omitted_when_unset() {
        let request = CompletionRequest {
            model: "m",
            prompt: "p",
            n: 4,
            max_tokens: 8,
            temperature: 0.6,
            top_p: 0.9,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            logprobs: 1,
            stop: None,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert!(v.get("stop").is_none());
        assert_eq!(v["n"], 4);
    }

    #[test]
    fn test_null_logprobs_are_skipped() {
        let choice: Choice = serde_json::from_value(json!({
            "index": 0,
            "text": "x",
            "logprobs": {"token_logprobs": [null, (0.25f64).ln(), (0.25f64).ln()]}
        }))
        .unwrap();
        let raw = score_choice(choice);
        assert!((raw.score - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_complete_against_mock() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let app = Router::new().route(
            "/v1/completions",
            post(move |Json(body): Json<Value>| {
                let s = s.clone();
                async move {
                    *s.lock().unwrap() = Some(body);
                    Json(json!({
                        "choices": [
                            {"index": 0, "text": "```lean\nsimp\n```",
                             "logprobs": {"token_logprobs": [-0.5, -0.5]}},
                            {"index": 1, "text": "```lean\nrfl\n```",
                             "logprobs": {"token_logprobs": [-0.1]}}
                        ]
                    }))
                }
            }),
        );
        let base = serve(app).await;

        let backend = Vllm::new(VllmConfig {
            model: "internlm/internlm2-math-plus-1_8b".into(),
            base_url: base,
            temperature: 0.6,
            top_p: 0.9,
            max_tokens: 1024,
            num_candidates: 32,
            stop: vec!["<|im_end|>".into()],
        })
        .unwrap();

        let out = backend.complete("prompt").await.unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0].score - (-0.5f64).exp()).abs() < 1e-12);
        assert!((out[1].score - (-0.1f64).exp()).abs() < 1e-12);

        let body = seen.lock().unwrap().take().unwrap();
        assert_eq!(body["n"], 32);
        assert_eq!(body["stop"][0], "<|im_end|>");
        assert_eq!(body["model"], "internlm/internlm2-math-plus-1_8b");
    }
}
