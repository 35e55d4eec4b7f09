//! Dispatch orchestration: one inbound request to exactly one client response.
//!
//! resolve route -> build the attempt (headers + body in the provider's format) -> send
//! -> on transport failure walk the fallback chain -> translate the response back.
//! Non-2xx responses from a reachable provider are passed through untouched.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::{json, Map, Value};

use crate::config::RouterConfig;
use crate::envelope::RequestEnvelope;
use crate::error::{ProxyError, Result};
use crate::providers::{build_headers, infer_format, Protocol};
use crate::relay::{self, ByteStream, FrameStream, StreamTelemetry};
use crate::route::{fallback_routes, pick_provider, resolve_route, CustomRouter, Route, Selection};
use crate::telemetry::{PriceTable, Telemetry};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, Usage};
use crate::translate::content::truthy;
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::{anthropic_to_openai, openai_to_anthropic};
use crate::translate::response::{anthropic_response_to_openai, openai_response_to_anthropic};

/// Anthropic rejects requests without `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u64 = 1024;

/// What the server should send back to the client.
pub enum DispatchResponse {
    /// A buffered success, already in the client's format.
    Json(Value),
    /// A non-2xx upstream response, relayed verbatim.
    Upstream {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    /// A translated event stream.
    Frames(FrameStream),
    /// An event stream in the client's own format, relayed byte for byte.
    Relay {
        content_type: Option<String>,
        body: ByteStream,
    },
}

impl fmt::Debug for DispatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Upstream { status, .. } => {
                f.debug_struct("Upstream").field("status", status).finish()
            }
            Self::Frames(_) => f.write_str("Frames"),
            Self::Relay { .. } => f.write_str("Relay"),
        }
    }
}

/// One fully prepared upstream call.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub route: Route,
    pub protocol: Protocol,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.route, f)
    }
}

impl Attempt {
    /// Build the call for `selection`: infer its format, resolve its key and shape the body.
    pub fn prepare(envelope: &RequestEnvelope, selection: Selection<'_>) -> Result<Self> {
        let route = selection.route();
        let url = selection
            .provider
            .endpoint()
            .ok_or_else(|| ProxyError::no_provider(Some(&route.to_string())))?;
        let built = build_headers(selection.provider);
        if built.api_key.is_none() {
            return Err(ProxyError::missing_api_key(&selection.provider.name));
        }
        let protocol = infer_format(selection.provider);
        let body = outbound_body(envelope, protocol, selection.model);

        Ok(Self {
            route,
            protocol,
            url,
            headers: built.headers,
            body,
        })
    }
}

/// The request body as `target` expects it, addressed to `model`.
pub fn outbound_body(envelope: &RequestEnvelope, target: Protocol, model: &str) -> Value {
    let inbound = envelope.body();
    let translated = if envelope.protocol == target {
        inbound.clone()
    } else {
        match target {
            Protocol::OpenAi => {
                serde_json::to_value(anthropic_to_openai(&MessagesRequest::from_value(inbound)))
            }
            Protocol::Anthropic => serde_json::to_value(openai_to_anthropic(
                &ChatCompletionRequest::from_value(inbound),
            )),
        }
        .unwrap_or_default()
    };

    let mut body = match translated {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    body.insert("model".to_string(), Value::String(model.to_string()));
    if target == Protocol::Anthropic && !body.get("max_tokens").is_some_and(truthy) {
        body.insert("max_tokens".to_string(), json!(DEFAULT_MAX_TOKENS));
    }
    Value::Object(body)
}

/// Token usage from a buffered response body in `protocol`'s format.
pub fn extract_usage(protocol: Protocol, body: &Value) -> Usage {
    match protocol {
        Protocol::Anthropic => MessagesResponse::from_value(body).usage.unwrap_or_default(),
        Protocol::OpenAi => ChatCompletionResponse::from_value(body)
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

/// Try each candidate in order and return the first success. Only transport failures
/// move on to the next candidate; any other error is returned as is. When every
/// candidate fails, the error lists each failure.
pub async fn attempt_with_fallback<C, O, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<O>
where
    C: fmt::Display,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<O>>,
{
    let mut failures = Vec::new();
    let mut all_timed_out = true;

    for candidate in candidates {
        let label = candidate.to_string();
        match attempt(candidate).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if !err.is_transport() => return Err(err),
            Err(err) => {
                tracing::warn!(route = %label, error = %err, "Attempt failed");
                all_timed_out &= matches!(err, ProxyError::Timeout { .. });
                failures.push(format!("{label}: {err}"));
            }
        }
    }

    Err(ProxyError::Exhausted {
        timed_out: all_timed_out && !failures.is_empty(),
        failures,
    })
}

enum Upstream {
    Buffered {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    Streaming(reqwest::Response),
}

pub struct Dispatcher {
    client: reqwest::Client,
    custom_router: Option<Arc<dyn CustomRouter>>,
    telemetry: Telemetry,
    config_pricing: bool,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        custom_router: Option<Arc<dyn CustomRouter>>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            client,
            custom_router,
            telemetry,
            config_pricing: false,
        }
    }

    /// Price each request from the `[pricing]` table of the config it was dispatched
    /// with, so edits to a reloaded config apply without a restart.
    pub fn with_config_pricing(mut self) -> Self {
        self.config_pricing = true;
        self
    }

    fn telemetry_for(&self, config: &RouterConfig) -> Telemetry {
        if self.config_pricing {
            self.telemetry
                .with_pricing(Arc::new(PriceTable::from_config(config)))
        } else {
            self.telemetry.clone()
        }
    }

    pub async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        config: &RouterConfig,
    ) -> Result<DispatchResponse> {
        let route = resolve_route(&envelope, config, self.custom_router.as_deref())
            .ok_or_else(|| ProxyError::no_provider(None))?;
        let selection =
            pick_provider(&route, config).ok_or_else(|| ProxyError::no_provider(Some(&route)))?;
        let primary = Attempt::prepare(&envelope, selection)?;
        let primary_route = primary.route.clone();

        tracing::info!(
            route = %primary_route,
            client = %envelope.protocol,
            upstream = %primary.protocol,
            stream = envelope.stream,
            tokens = envelope.token_count,
            "Dispatching"
        );

        let timeout = Duration::from_millis(config.api_timeout_ms);
        let telemetry = self.telemetry_for(config);
        let started = Instant::now();

        let mut tried = HashSet::from([primary_route.clone()]);
        let fallbacks = fallback_routes(config, &route)
            .into_iter()
            .filter_map(|candidate| {
                let selection = pick_provider(&candidate, config)?;
                if !tried.insert(selection.route()) {
                    return None;
                }
                Attempt::prepare(&envelope, selection)
                    .map_err(|err| {
                        tracing::debug!(route = %candidate, error = %err, "Skipping fallback");
                    })
                    .ok()
            });
        let candidates = std::iter::once(primary).chain(fallbacks);

        let stream = envelope.stream;
        let outcome = attempt_with_fallback(candidates, |attempt| async move {
            let upstream = self.send(&attempt, stream, timeout).await?;
            Ok((attempt, upstream))
        })
        .await;

        let (attempt, upstream) = match outcome {
            Ok(success) => success,
            Err(err) => {
                telemetry.emit(
                    &primary_route.provider,
                    &primary_route.model,
                    0,
                    0,
                    elapsed_ms(started),
                    false,
                );
                return Err(err);
            }
        };
        if attempt.route != primary_route {
            tracing::info!(route = %attempt.route, "Served by fallback");
        }

        match upstream {
            Upstream::Buffered {
                status,
                content_type,
                body,
            } => Ok(finish_buffered(
                &telemetry,
                &envelope,
                &attempt,
                started,
                status,
                content_type,
                body,
            )),
            Upstream::Streaming(response) => Ok(finish_streaming(
                telemetry, &envelope, &attempt, started, timeout, response,
            )
            .await),
        }
    }

    async fn send(&self, attempt: &Attempt, stream: bool, timeout: Duration) -> Result<Upstream> {
        let request = self
            .client
            .post(&attempt.url)
            .headers(attempt.headers.clone())
            .json(&attempt.body);

        if stream {
            let response = tokio::time::timeout(timeout, request.send())
                .await
                .map_err(|_| ProxyError::timeout(timeout))?
                .map_err(|e| ProxyError::transport(&e))?;
            return Ok(Upstream::Streaming(response));
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let content_type = content_type_of(response.headers());
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(Upstream::Buffered {
                status,
                content_type,
                body,
            })
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ProxyError::timeout(timeout))?
            .map_err(|e| ProxyError::transport(&e))
    }
}

fn finish_buffered(
    telemetry: &Telemetry,
    envelope: &RequestEnvelope,
    attempt: &Attempt,
    started: Instant,
    status: u16,
    content_type: Option<String>,
    body: Bytes,
) -> DispatchResponse {
    let route = &attempt.route;
    if !(200..300).contains(&status) {
        tracing::warn!(%route, status, "Upstream returned an error status");
        telemetry.emit(&route.provider, &route.model, 0, 0, elapsed_ms(started), false);
        return DispatchResponse::Upstream {
            status,
            content_type: content_type.unwrap_or_else(|| "application/json".to_string()),
            body,
        };
    }

    let payload: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| json!({ "error": "Invalid upstream response" }));
    let usage = extract_usage(attempt.protocol, &payload);
    telemetry.emit(
        &route.provider,
        &route.model,
        usage.input_tokens,
        usage.output_tokens,
        elapsed_ms(started),
        true,
    );

    let payload = match (envelope.protocol, attempt.protocol) {
        (Protocol::Anthropic, Protocol::OpenAi) => {
            serde_json::to_value(openai_response_to_anthropic(&payload, &route.model))
        }
        (Protocol::OpenAi, Protocol::Anthropic) => {
            serde_json::to_value(anthropic_response_to_openai(&payload, &route.model))
        }
        _ => Ok(payload),
    }
    .unwrap_or_default();

    DispatchResponse::Json(payload)
}

async fn finish_streaming(
    telemetry: Telemetry,
    envelope: &RequestEnvelope,
    attempt: &Attempt,
    started: Instant,
    timeout: Duration,
    response: reqwest::Response,
) -> DispatchResponse {
    let route = &attempt.route;
    let status = response.status().as_u16();
    let content_type = content_type_of(response.headers());

    if !response.status().is_success() {
        tracing::warn!(%route, status, "Upstream returned an error status");
        telemetry.emit(&route.provider, &route.model, 0, 0, elapsed_ms(started), false);
        // The status line already arrived; a body that stalls or breaks must not mask it.
        let body = match tokio::time::timeout(timeout, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                tracing::warn!(%route, error = %e, "Error body could not be read");
                Bytes::new()
            }
            Err(_) => {
                tracing::warn!(%route, ?timeout, "Timed out reading error body");
                Bytes::new()
            }
        };
        return DispatchResponse::Upstream {
            status,
            content_type: content_type.unwrap_or_else(|| "application/json".to_string()),
            body,
        };
    }

    let guard = StreamTelemetry::new(telemetry, &route.provider, &route.model, started);
    let bytes = relay::upstream_bytes(response, timeout);

    match relay::translator_for(envelope.protocol, attempt.protocol, &route.model) {
        Some(translator) => DispatchResponse::Frames(relay::translate(bytes, translator, guard)),
        None => DispatchResponse::Relay {
            content_type,
            body: relay::passthrough(bytes, guard),
        },
    }
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
