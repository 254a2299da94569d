//! Serverless entry point: one event in, one generation response out.
//!
//! Events have the shape `{"input": {"name", "input", "prefix"?}}`. The same
//! handler backs `POST /runsync` and the one-shot `--event` mode.

use tracing::info;

use crate::errors::AdapterError;
use crate::protocol::{GenerateResponse, ServerlessEvent};
use crate::registry::Registry;

/// Decode an event body.
pub fn parse_event(body: &str) -> Result<ServerlessEvent, AdapterError> {
    serde_json::from_str(body).map_err(|e| AdapterError::InvalidRequest(format!("invalid event: {e}")))
}

/// Run the generation an event asks for.
pub async fn handler(registry: &Registry, event: ServerlessEvent) -> Result<GenerateResponse, AdapterError> {
    let request = event.input;
    info!(model = %request.name, "serverless event");
    let candidates = registry.generate(&request).await?;
    Ok(GenerateResponse::from(candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::StubGenerator;
    use crate::adapter::Adapter;
    use crate::prompt::PromptFormatter;
    use crate::protocol::Generation;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                "stub",
                Adapter::new("stub", PromptFormatter::new("raw").unwrap())
                    .with_generator(StubGenerator::new(&[("rfl", 0.9), ("rfl", 0.5), ("simp", 0.9)])),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_handler_returns_ranked_outputs() {
        let event = parse_event(r#"{"input": {"name": "stub", "input": "⊢ 1 = 1"}}"#).unwrap();
        let response = handler(&registry(), event).await.unwrap();
        assert_eq!(
            response.outputs,
            vec![
                Generation {
                    output: "rfl".into(),
                    score: 0.9
                },
                Generation {
                    output: "simp".into(),
                    score: 0.9
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_unknown_model() {
        let event = parse_event(r#"{"input": {"name": "nope", "input": "⊢ 1 = 1"}}"#).unwrap();
        let err = handler(&registry(), event).await.unwrap_err();
        assert!(matches!(err, AdapterError::UnknownModel(_)));
    }

    #[test]
    fn test_parse_event_rejects_missing_input() {
        assert!(matches!(
            parse_event(r#"{"name": "stub", "input": "⊢ 1 = 1"}"#),
            Err(AdapterError::InvalidRequest(_))
        ));
    }
}
