pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod tei;
pub mod tgi;
pub mod vllm;

pub use anthropic::{Anthropic, AnthropicConfig};
pub use gemini::{Gemini, GeminiConfig};
pub use self::http::{RetryPolicy, TransportError};
pub use openai::{OpenAi, OpenAiConfig};
pub use tei::{Tei, TeiConfig};
pub use tgi::{Architecture, Tgi, TgiConfig};
pub use vllm::{Vllm, VllmConfig};

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::AdapterError;

/// One raw completion as the backend returned it, before tactic extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCompletion {
    pub text: String,
    pub score: f64,
}

/// Backend capable of completing a formatted prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend kind, for logs and model listings.
    fn name(&self) -> &str;

    /// Whether generation may be constrained by a non-empty target prefix.
    fn accepts_prefix(&self) -> bool {
        true
    }

    /// Issue one backend call and return every completion it produced, in
    /// backend order, each with its backend-specific score.
    async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError>;
}

/// Backend capable of embedding a proof state.
#[async_trait]
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Embedding width of the loaded model.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f64>, AdapterError>;
}

/// Backend kinds accepted in the models file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Gemini,
    Vllm,
    Tgi,
    Tei,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Gemini => "gemini",
            BackendKind::Vllm => "vllm",
            BackendKind::Tgi => "tgi",
            BackendKind::Tei => "tei",
        }
    }

    /// Local inference servers run one call at a time per adapter and are
    /// never retried.
    pub fn is_local(self) -> bool {
        matches!(self, BackendKind::Vllm | BackendKind::Tgi | BackendKind::Tei)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `app` on a random local port. Returns the base URL.
    pub async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }
}
