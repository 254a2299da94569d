use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;

/// Request body for `/generate`, `/encode` and serverless events.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Registered adapter name.
    pub name: String,
    /// Pretty-printed proof state.
    pub input: String,
    /// Target prefix to continue from; missing or null means none.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl GenerateRequest {
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

/// Encoding takes the same body shape.
pub type EncodeRequest = GenerateRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub output: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub outputs: Vec<Generation>,
}

impl From<Vec<Candidate>> for GenerateResponse {
    fn from(candidates: Vec<Candidate>) -> Self {
        Self {
            outputs: candidates
                .into_iter()
                .map(|c| Generation {
                    output: c.text,
                    score: c.score,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeResponse {
    pub outputs: Vec<f64>,
}

/// Error response returned by the API.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub models: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

/// One registered adapter as listed on `/models`.
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub backend: String,
    pub model: String,
    pub generate: bool,
    pub prefix: bool,
    /// Embedding width, when the adapter can encode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encode: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// Serverless invocation envelope: `{"input": {...}}`.
#[derive(Debug, Deserialize)]
pub struct ServerlessEvent {
    pub input: GenerateRequest,
}

/// Serverless result envelope: `{"output": {...}}`.
#[derive(Debug, Serialize)]
pub struct ServerlessOutput {
    pub output: GenerateResponse,
}
