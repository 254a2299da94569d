use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tracing::{error, warn};

use crate::errors::{AdapterError, CallFailure};
use crate::protocol::{
    EncodeRequest, EncodeResponse, ErrorResponse, GenerateRequest, GenerateResponse,
    HealthResponse, ModelInfo, ModelsResponse, ServerlessEvent, ServerlessOutput,
};
use crate::registry::Registry;
use crate::serverless;

use super::middleware::{ErrorKind, RequestModel};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<Registry>,
}

/// Health check handler.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        models: state.registry.len(),
    })
}

/// Registered models and what each can do.
pub async fn models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state
        .registry
        .iter()
        .map(|(name, adapter)| {
            let caps = adapter.capabilities();
            ModelInfo {
                name: name.to_string(),
                backend: adapter.backend().to_string(),
                model: adapter.model().to_string(),
                generate: caps.generate,
                prefix: caps.prefix,
                encode: caps.encode,
                device: adapter.device().map(|d| d.to_string()),
            }
        })
        .collect();
    Json(ModelsResponse { models })
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<(Extension<RequestModel>, Json<GenerateResponse>), ApiError> {
    let Json(request) = body?;
    let candidates = state
        .registry
        .generate(&request)
        .await
        .map_err(|e| ApiError::adapter(&request.name, e))?;
    Ok((
        Extension(RequestModel(request.name)),
        Json(GenerateResponse::from(candidates)),
    ))
}

pub async fn encode(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EncodeRequest>, JsonRejection>,
) -> Result<(Extension<RequestModel>, Json<EncodeResponse>), ApiError> {
    let Json(request) = body?;
    let outputs = state
        .registry
        .encode(&request)
        .await
        .map_err(|e| ApiError::adapter(&request.name, e))?;
    Ok((
        Extension(RequestModel(request.name)),
        Json(EncodeResponse { outputs }),
    ))
}

/// Serverless-style synchronous invocation.
pub async fn runsync(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ServerlessEvent>, JsonRejection>,
) -> Result<(Extension<RequestModel>, Json<ServerlessOutput>), ApiError> {
    let Json(event) = body?;
    let name = event.input.name.clone();
    let output = serverless::handler(&state.registry, event)
        .await
        .map_err(|e| ApiError::adapter(&name, e))?;
    Ok((Extension(RequestModel(name)), Json(ServerlessOutput { output })))
}

/// Error rendered as `{"error": ...}` with a status derived from its kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    model: Option<String>,
    message: String,
}

impl ApiError {
    fn adapter(model: &str, e: AdapterError) -> Self {
        let status = status_for(&e);
        match status {
            s if s.is_server_error() => error!(model, error = %e, "request failed"),
            _ => warn!(model, error = %e, "request rejected"),
        }
        Self {
            status,
            kind: e.kind(),
            model: Some(model.to_string()),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "malformed_body",
            model: None,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = write_error(self.status, &self.message);
        response.extensions_mut().insert(ErrorKind(self.kind));
        if let Some(model) = self.model {
            response.extensions_mut().insert(RequestModel(model));
        }
        response
    }
}

pub fn status_for(e: &AdapterError) -> StatusCode {
    match e {
        AdapterError::UnknownModel(_) => StatusCode::NOT_FOUND,
        AdapterError::UnsupportedOperation(_) | AdapterError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        AdapterError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AdapterError::BackendCall {
            failure: CallFailure::Timeout,
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        AdapterError::BackendCall { .. } => StatusCode::BAD_GATEWAY,
        AdapterError::UnsupportedBackend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn write_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}
