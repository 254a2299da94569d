//! Encoder-only checkpoints served by a text-embeddings-inference compatible
//! server (`POST /embed`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::http::{HttpTransport, RetryPolicy, TransportError};
use super::Encoder;
use crate::errors::{AdapterError, CallFailure};

/// Embedding adapter configuration.
pub struct TeiConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
}

pub struct Tei {
    dimension: usize,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct EmbedResponse(Vec<Vec<f64>>);

impl Tei {
    pub fn new(config: TeiConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new("tei", &config.base_url, None, RetryPolicy::none())?;
        info!(
            model = %config.model,
            dimension = config.dimension,
            base_url = transport.base_url(),
            "using embedding server"
        );

        Ok(Self {
            dimension: config.dimension,
            transport,
        })
    }
}

#[async_trait]
impl Encoder for Tei {
    fn name(&self) -> &str {
        "tei"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        let request = EmbedRequest {
            inputs: text,
            truncate: false,
        };
        let EmbedResponse(mut embeddings): EmbedResponse =
            self.transport.post_json("/embed", &request).await?;

        if embeddings.len() != 1 {
            return Err(AdapterError::backend_call(
                "tei",
                CallFailure::Decode,
                format!("expected one embedding, got {}", embeddings.len()),
            ));
        }
        Ok(embeddings.swap_remove(0))
    }
}
