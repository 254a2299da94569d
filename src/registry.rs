//! Name → adapter routing, built once at startup from the models file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapter::Adapter;
use crate::backend::{
    Anthropic, AnthropicConfig, BackendKind, Gemini, GeminiConfig, OpenAi, OpenAiConfig,
    RetryPolicy, Tei, TeiConfig, Tgi, TgiConfig, TransportError, Vllm, VllmConfig,
};
use crate::candidate::Candidate;
use crate::config::{ConfigError, ModelEntry, ModelsFile};
use crate::device::{Device, InvalidDevice};
use crate::errors::AdapterError;
use crate::prompt::{PromptFamily, PromptFormatter, CHATML_END};
use crate::protocol::{EncodeRequest, GenerateRequest};

#[derive(Default)]
pub struct Registry {
    adapters: HashMap<String, Arc<Adapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every adapter in `file`, reading API keys from the process
    /// environment.
    pub fn from_models(file: &ModelsFile) -> Result<Self, ConfigError> {
        Self::from_entries(&file.model, |var| std::env::var(var).ok())
    }

    pub fn from_entries<F>(entries: &[ModelEntry], env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();
        for entry in entries {
            let adapter = build_adapter(entry, &env)?;
            registry.register(entry.name.clone(), adapter)?;
        }
        Ok(registry)
    }

    /// Add an adapter under `name`. Names are unique.
    pub fn register(&mut self, name: impl Into<String>, adapter: Adapter) -> Result<(), ConfigError> {
        let name = name.into();
        if self.adapters.contains_key(&name) {
            return Err(ConfigError::DuplicateModel(name));
        }
        self.adapters.insert(name, Arc::new(adapter));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Adapter>, AdapterError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownModel(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registered adapters, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Adapter)> {
        let mut entries: Vec<_> = self
            .adapters
            .iter()
            .map(|(name, adapter)| (name.as_str(), adapter.as_ref()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries.into_iter()
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Vec<Candidate>, AdapterError> {
        let adapter = self.get(&request.name)?;
        adapter.generate(&request.input, request.prefix()).await
    }

    pub async fn encode(&self, request: &EncodeRequest) -> Result<Vec<f64>, AdapterError> {
        let adapter = self.get(&request.name)?;
        if !request.prefix().is_empty() {
            return Err(AdapterError::UnsupportedOperation(
                "encode does not take a prefix".into(),
            ));
        }
        adapter.encode(&request.input).await
    }
}

fn default_family(kind: BackendKind) -> PromptFamily {
    match kind {
        BackendKind::OpenAi | BackendKind::Anthropic | BackendKind::Gemini => PromptFamily::HostedChat,
        BackendKind::Vllm => PromptFamily::LocalChat,
        BackendKind::Tgi | BackendKind::Tei => PromptFamily::Raw,
    }
}

fn default_key_var(kind: BackendKind) -> Option<&'static str> {
    match kind {
        BackendKind::OpenAi => Some("OPENAI_API_KEY"),
        BackendKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        BackendKind::Gemini => Some("GOOGLE_API_KEY"),
        _ => None,
    }
}

fn invalid(entry: &ModelEntry, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEntry {
        name: entry.name.clone(),
        reason: reason.into(),
    }
}

/// Construct one adapter from its models-file entry.
pub fn build_adapter<F>(entry: &ModelEntry, env: &F) -> Result<Adapter, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = entry.backend;
    let formatter = match &entry.prompt {
        Some(tag) => PromptFormatter::new(tag).map_err(|source| ConfigError::Adapter {
            name: entry.name.clone(),
            source,
        })?,
        None => PromptFormatter::for_family(default_family(kind)),
    };
    let device: Device = entry
        .device
        .parse()
        .map_err(|e: InvalidDevice| invalid(entry, e.to_string()))?;
    if entry.num_candidates == 0 {
        return Err(invalid(entry, "num_candidates must be at least 1"));
    }
    if entry.timeout_secs == 0 {
        return Err(invalid(entry, "timeout_secs must be at least 1"));
    }

    let transport_err = |source: TransportError| ConfigError::Transport {
        name: entry.name.clone(),
        source,
    };
    let local_url = || {
        entry
            .base_url
            .clone()
            .ok_or_else(|| invalid(entry, format!("{} requires base_url", kind.as_str())))
    };
    let api_key = || -> Result<String, ConfigError> {
        let var = entry
            .api_key_env
            .as_deref()
            .or(default_key_var(kind))
            .unwrap_or_default();
        env(var).filter(|k| !k.is_empty()).ok_or_else(|| ConfigError::MissingApiKey {
            name: entry.name.clone(),
            var: var.to_string(),
        })
    };
    let timeout = Duration::from_secs(entry.timeout_secs);
    let retry = RetryPolicy::bounded(entry.max_retries);

    let family = formatter.family();
    let adapter = Adapter::new(&entry.model, formatter);
    let adapter = match kind {
        BackendKind::OpenAi => adapter.with_generator(
            OpenAi::new(OpenAiConfig {
                model: entry.model.clone(),
                base_url: entry.base_url.clone(),
                api_key: api_key()?,
                temperature: entry.temperature,
                top_p: entry.top_p,
                max_tokens: entry.max_tokens,
                num_candidates: entry.num_candidates,
                timeout,
                retry,
            })
            .map_err(transport_err)?,
        ),
        BackendKind::Anthropic => adapter.with_generator(
            Anthropic::new(AnthropicConfig {
                model: entry.model.clone(),
                base_url: entry.base_url.clone(),
                api_key: api_key()?,
                temperature: entry.temperature,
                // Sent only when it narrows sampling.
                top_p: (entry.top_p < 1.0).then_some(entry.top_p),
                max_tokens: entry.max_tokens,
                timeout,
                retry,
            })
            .map_err(transport_err)?,
        ),
        BackendKind::Gemini => adapter.with_generator(
            Gemini::new(GeminiConfig {
                model: entry.model.clone(),
                base_url: entry.base_url.clone(),
                api_key: api_key()?,
                temperature: entry.temperature,
                top_p: entry.top_p,
                max_tokens: entry.max_tokens,
                timeout,
                retry,
            })
            .map_err(transport_err)?,
        ),
        BackendKind::Vllm => {
            let stop = match family {
                PromptFamily::LocalChat => vec![CHATML_END.to_string()],
                _ => Vec::new(),
            };
            adapter.with_generator(
                Vllm::new(VllmConfig {
                    model: entry.model.clone(),
                    base_url: local_url()?,
                    temperature: entry.temperature,
                    top_p: entry.top_p,
                    max_tokens: entry.max_tokens,
                    num_candidates: entry.num_candidates,
                    stop,
                })
                .map_err(transport_err)?,
            )
        }
        BackendKind::Tgi => adapter.with_generator(
            Tgi::new(TgiConfig {
                model: entry.model.clone(),
                base_url: local_url()?,
                architecture: entry.architecture,
                temperature: entry.temperature,
                top_p: entry.top_p,
                max_tokens: entry.max_tokens,
                num_candidates: entry.num_candidates,
                parallelism: entry.parallelism,
            })
            .map_err(transport_err)?,
        ),
        BackendKind::Tei => {
            let dimension = entry
                .embedding_dim
                .filter(|d| *d > 0)
                .ok_or_else(|| invalid(entry, "tei requires a positive embedding_dim"))?;
            adapter.with_encoder(
                Tei::new(TeiConfig {
                    model: entry.model.clone(),
                    base_url: local_url()?,
                    dimension,
                })
                .map_err(transport_err)?,
            )
        }
    };

    let adapter = if kind.is_local() {
        let device = device.resolve();
        info!(name = %entry.name, device = %device, "local model placement");
        adapter.with_device(device).serialized()
    } else {
        adapter
    };

    info!(
        name = %entry.name,
        backend = kind.as_str(),
        model = %entry.model,
        prompt = %adapter.family(),
        "registered model"
    );
    Ok(adapter)
}
