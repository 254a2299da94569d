//! The uniform generation/encoding contract every backend participates through.
//!
//! An [`Adapter`] pairs a prompt formatter with an optional [`Generator`] and
//! an optional [`Encoder`]. Capability checks happen here, before any backend
//! call, and every generation result goes through [`dedup`].

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::http::preview;
use crate::backend::{Encoder, Generator};
use crate::candidate::{dedup, Candidate};
use crate::device::Device;
use crate::errors::{AdapterError, CallFailure};
use crate::prompt::{PromptFamily, PromptFormatter};

/// What an adapter can do, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub generate: bool,
    pub prefix: bool,
    /// Embedding width when the adapter can encode.
    pub encode: Option<usize>,
}

pub struct Adapter {
    model: String,
    formatter: PromptFormatter,
    generator: Option<Box<dyn Generator>>,
    encoder: Option<Box<dyn Encoder>>,
    device: Option<Device>,
    /// Held across backend calls of local adapters: one call at a time.
    gate: Option<Mutex<()>>,
}

impl Adapter {
    pub fn new(model: impl Into<String>, formatter: PromptFormatter) -> Self {
        Self {
            model: model.into(),
            formatter,
            generator: None,
            encoder: None,
            device: None,
            gate: None,
        }
    }

    pub fn with_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Run backend calls one at a time.
    pub fn serialized(mut self) -> Self {
        self.gate = Some(Mutex::new(()));
        self
    }

    /// Backend model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn family(&self) -> PromptFamily {
        self.formatter.family()
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }

    /// Backend kind name, from whichever capability is present.
    pub fn backend(&self) -> &str {
        match (&self.generator, &self.encoder) {
            (Some(g), _) => g.name(),
            (None, Some(e)) => e.name(),
            (None, None) => "none",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            generate: self.generator.is_some(),
            prefix: self
                .generator
                .as_ref()
                .map(|g| g.accepts_prefix())
                .unwrap_or(false),
            encode: self.encoder.as_ref().map(|e| e.dimension()),
        }
    }

    /// Propose ranked, deduplicated tactics for `state`, optionally continuing
    /// from `prefix`.
    ///
    /// Completions whose tactic cannot be extracted are dropped. If every
    /// completion is dropped the call fails with the last extraction error.
    pub async fn generate(&self, state: &str, prefix: &str) -> Result<Vec<Candidate>, AdapterError> {
        if state.is_empty() {
            return Err(AdapterError::InvalidRequest("input must not be empty".into()));
        }
        let generator = self.generator.as_deref().ok_or_else(|| {
            AdapterError::UnsupportedOperation(format!("{} does not support generate", self.model))
        })?;
        if !prefix.is_empty() && !generator.accepts_prefix() {
            return Err(AdapterError::UnsupportedOperation(format!(
                "{} does not support a target prefix",
                self.model
            )));
        }

        let prompt = self.formatter.format_prompt(&format!("{state}{prefix}"));
        let completions = {
            let _guard = match &self.gate {
                Some(gate) => Some(gate.lock().await),
                None => None,
            };
            generator.complete(&prompt).await?
        };

        let total = completions.len();
        let mut last_error = None;
        let mut extracted = Vec::with_capacity(total);
        for (i, completion) in completions.into_iter().enumerate() {
            match self.formatter.extract_tactic(prefix, &completion.text) {
                Ok(tactic) => extracted.push(Candidate::new(tactic, completion.score)),
                Err(e) => {
                    warn!(
                        model = %self.model,
                        candidate = i,
                        raw = %preview(&completion.text, 80),
                        error = %e,
                        "dropping candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        if extracted.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let ranked = dedup(extracted);
        debug!(
            model = %self.model,
            completions = total,
            unique = ranked.len(),
            "generation complete"
        );
        Ok(ranked)
    }

    /// Embed `state` with the adapter's encoder.
    pub async fn encode(&self, state: &str) -> Result<Vec<f64>, AdapterError> {
        if state.is_empty() {
            return Err(AdapterError::InvalidRequest("input must not be empty".into()));
        }
        let encoder = self.encoder.as_deref().ok_or_else(|| {
            AdapterError::UnsupportedOperation(format!("{} does not support encode", self.model))
        })?;

        let embedding = {
            let _guard = match &self.gate {
                Some(gate) => Some(gate.lock().await),
                None => None,
            };
            encoder.embed(state).await?
        };

        if embedding.len() != encoder.dimension() {
            return Err(AdapterError::backend_call(
                encoder.name(),
                CallFailure::Decode,
                format!(
                    "expected {} dimensions, got {}",
                    encoder.dimension(),
                    embedding.len()
                ),
            ));
        }
        Ok(embedding)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::backend::{Encoder, Generator, RawCompletion};
    use crate::errors::AdapterError;

    /// Generator returning a fixed list of completions.
    pub struct StubGenerator {
        pub completions: Vec<RawCompletion>,
        pub accepts_prefix: bool,
        pub calls: Arc<AtomicUsize>,
        pub prompts: Arc<Mutex<Vec<String>>>,
        pub delay: Duration,
        pub in_flight: Arc<AtomicUsize>,
        pub max_in_flight: Arc<AtomicUsize>,
    }

    impl StubGenerator {
        pub fn new(completions: &[(&str, f64)]) -> Self {
            Self {
                completions: completions
                    .iter()
                    .map(|(text, score)| RawCompletion {
                        text: text.to_string(),
                        score: *score,
                    })
                    .collect(),
                accepts_prefix: true,
                calls: Arc::new(AtomicUsize::new(0)),
                prompts: Arc::new(Mutex::new(Vec::new())),
                delay: Duration::ZERO,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn without_prefix(mut self) -> Self {
            self.accepts_prefix = false;
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Generator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        fn accepts_prefix(&self) -> bool {
            self.accepts_prefix
        }

        async fn complete(&self, prompt: &str) -> Result<Vec<RawCompletion>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(self.completions.clone())
        }
    }

    /// Encoder returning a fixed vector.
    pub struct StubEncoder {
        pub vector: Vec<f64>,
        pub dimension: usize,
    }

    #[async_trait]
    impl Encoder for StubEncoder {
        fn name(&self) -> &str {
            "stub"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f64>, AdapterError> {
            Ok(self.vector.clone())
        }
    }
}
