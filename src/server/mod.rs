pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::registry::Registry;

use self::handlers::AppState;

/// Build the axum router over a fully constructed registry.
pub fn build_router(registry: Arc<Registry>) -> Router {
    let state = Arc::new(AppState { registry });

    Router::new()
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .route("/generate", post(handlers::generate))
        .route("/encode", post(handlers::encode))
        .route("/runsync", post(handlers::runsync))
        .layer(axum_middleware::from_fn(
            middleware::protocol_version_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::{json, Value};

    use super::*;
    use crate::adapter::testing::{StubEncoder, StubGenerator};
    use crate::adapter::Adapter;
    use crate::backend::testing::serve;
    use crate::prompt::PromptFormatter;

    const STATE: &str = "n : ℕ\n⊢ gcd n n = n";

    async fn app() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        let byt5 = StubGenerator::new(&[("rfl", 0.9), ("rfl", 0.5), ("simp", 0.9)]).without_prefix();
        let byt5_calls = byt5.calls.clone();

        let mut registry = Registry::new();
        registry
            .register(
                "byt5",
                Adapter::new("byt5-small", PromptFormatter::new("raw").unwrap()).with_generator(byt5),
            )
            .unwrap();
        registry
            .register(
                "chat",
                Adapter::new("gpt-4o", PromptFormatter::new("hosted-chat").unwrap())
                    .with_generator(StubGenerator::new(&[("no tactic here", 1.0)])),
            )
            .unwrap();
        registry
            .register(
                "retriever",
                Adapter::new("byt5-retriever", PromptFormatter::new("raw").unwrap()).with_encoder(
                    StubEncoder {
                        vector: vec![0.5, -0.5],
                        dimension: 2,
                    },
                ),
            )
            .unwrap();

        (serve(build_router(Arc::new(registry))).await, byt5_calls)
    }

    async fn post_json(url: String, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new().post(url).json(&body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_health_counts_models() {
        let (base, _) = app().await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-protocol-version"], "1");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok", "models": 3}));
    }

    #[tokio::test]
    async fn test_models_listing() {
        let (base, _) = app().await;
        let body: Value = reqwest::get(format!("{base}/models"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let models = body["models"].as_array().unwrap();
        assert_eq!(models.len(), 3);
        assert_eq!(models[0]["name"], "byt5");
        assert_eq!(models[0]["generate"], true);
        assert_eq!(models[0]["prefix"], false);
        assert_eq!(models[2]["name"], "retriever");
        assert_eq!(models[2]["encode"], 2);
    }

    #[tokio::test]
    async fn test_generate() {
        let (base, _) = app().await;
        let (status, body) = post_json(
            format!("{base}/generate"),
            json!({"name": "byt5", "input": STATE}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(
            body,
            json!({"outputs": [{"output": "rfl", "score": 0.9}, {"output": "simp", "score": 0.9}]})
        );
    }

    #[tokio::test]
    async fn test_generate_error_statuses() {
        let (base, calls) = app().await;
        let url = format!("{base}/generate");

        let (status, body) = post_json(url.clone(), json!({"name": "gpt-9", "input": STATE})).await;
        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("gpt-9"));

        let (status, _) =
            post_json(url.clone(), json!({"name": "byt5", "input": STATE, "prefix": "apply"})).await;
        assert_eq!(status, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let (status, _) = post_json(url.clone(), json!({"name": "chat", "input": STATE})).await;
        assert_eq!(status, 422);

        let (status, _) = post_json(url.clone(), json!({"name": "byt5", "input": ""})).await;
        assert_eq!(status, 400);

        let (status, body) = post_json(url, json!({"input": STATE})).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_encode() {
        let (base, _) = app().await;
        let url = format!("{base}/encode");

        let (status, body) = post_json(url.clone(), json!({"name": "retriever", "input": STATE})).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"outputs": [0.5, -0.5]}));

        let (status, _) = post_json(url.clone(), json!({"name": "byt5", "input": STATE})).await;
        assert_eq!(status, 400);

        let (status, _) = post_json(
            url,
            json!({"name": "retriever", "input": STATE, "prefix": "simp"}),
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_runsync_wraps_output() {
        let (base, _) = app().await;
        let (status, body) = post_json(
            format!("{base}/runsync"),
            json!({"input": {"name": "byt5", "input": STATE}}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["output"]["outputs"][0]["output"], "rfl");
    }
}
