use crate::config::ConfigSource;
use crate::dispatch::{DispatchResponse, Dispatcher};
use crate::envelope::RequestEnvelope;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::providers::Protocol;
use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::openai_types::ChatErrorResponse;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ConfigSource,
    pub dispatcher: Dispatcher,
    /// Receives request-level failures that never reach a provider.
    pub logger: Option<SharedLogger>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/responses", post(handle_responses))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(body) => dispatch(&state, Protocol::Anthropic, body).await,
        Err(message) => error_response(Protocol::Anthropic, StatusCode::BAD_REQUEST, message),
    }
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(body) => dispatch(&state, Protocol::OpenAi, body).await,
        Err(message) => error_response(Protocol::OpenAi, StatusCode::BAD_REQUEST, message),
    }
}

/// Responses-style requests are chat completions with `input` in place of `messages`.
async fn handle_responses(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(body) => dispatch(&state, Protocol::OpenAi, normalize_responses_input(body)).await,
        Err(message) => error_response(Protocol::OpenAi, StatusCode::BAD_REQUEST, message),
    }
}

async fn handle_count_tokens(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(body) => {
            let envelope = RequestEnvelope::new(Protocol::Anthropic, body);
            Json(json!({ "input_tokens": envelope.token_count })).into_response()
        }
        Err(message) => error_response(Protocol::Anthropic, StatusCode::BAD_REQUEST, message),
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    let config = match state.config.snapshot() {
        Ok(config) => config,
        Err(e) => {
            return error_response(
                Protocol::OpenAi,
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            )
        }
    };

    let models: Vec<Value> = config
        .providers
        .iter()
        .flat_map(|provider| {
            provider.models.iter().map(move |model| {
                json!({
                    "id": format!("{},{model}", provider.name),
                    "object": "model",
                    "owned_by": provider.name,
                })
            })
        })
        .collect();

    Json(json!({ "data": models, "object": "list" })).into_response()
}

async fn dispatch(state: &AppState, protocol: Protocol, body: Value) -> Response {
    let config = match state.config.snapshot() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            return error_response(protocol, StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let envelope = RequestEnvelope::new(protocol, body);
    match state.dispatcher.dispatch(envelope, &config).await {
        Ok(response) => into_client_response(response),
        Err(e) => {
            tracing::warn!(error = %e, "Request failed");
            if let Some(logger) = &state.logger {
                logger.warn("server", e.to_string());
            }
            proxy_error_response(protocol, &e)
        }
    }
}

fn into_client_response(response: DispatchResponse) -> Response {
    match response {
        DispatchResponse::Json(value) => Json(value).into_response(),
        DispatchResponse::Upstream {
            status,
            content_type,
            body,
        } => Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        DispatchResponse::Frames(frames) => {
            let events = frames.map(|frame| -> Result<Event, Infallible> {
                let event = match frame.event {
                    Some(name) => Event::default().event(name),
                    None => Event::default(),
                };
                Ok(event.data(frame.data))
            });
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        DispatchResponse::Relay { content_type, body } => Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                content_type.unwrap_or_else(|| "text/event-stream".to_string()),
            )
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

fn parse_body(body: &Bytes) -> Result<Value, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| format!("Invalid request body: {e}"))
}

/// Fill `messages` from `input` when the client sent only the latter.
pub fn normalize_responses_input(mut body: Value) -> Value {
    let Some(map) = body.as_object_mut() else {
        return body;
    };
    if map.contains_key("messages") {
        return body;
    }
    if let Some(input) = map.remove("input") {
        let messages = match input {
            Value::String(text) => json!([{ "role": "user", "content": text }]),
            Value::Array(items) => Value::Array(items),
            _ => json!([]),
        };
        map.insert("messages".to_string(), messages);
    }
    body
}

fn proxy_error_response(protocol: Protocol, error: &ProxyError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(protocol, status, error.to_string())
}

fn error_response(protocol: Protocol, status: StatusCode, message: String) -> Response {
    let error_type = match status.as_u16() {
        400 => "invalid_request_error",
        504 => "timeout_error",
        _ => "api_error",
    };
    match protocol {
        Protocol::Anthropic => {
            (status, Json(ErrorResponse::new(error_type, message))).into_response()
        }
        Protocol::OpenAi => {
            (status, Json(ChatErrorResponse::new(error_type, message))).into_response()
        }
    }
}
