//! Protocol-agnostic view of one inbound request.

use serde_json::Value;

use crate::providers::Protocol;
use crate::route::estimate_tokens;
use crate::translate::content::{truthy, Content};

/// What the router needs to know about a request, independent of its wire format.
/// The raw body is kept for the outbound translation.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub protocol: Protocol,
    pub model: Option<String>,
    pub system: Option<Content>,
    pub stream: bool,
    pub thinking: bool,
    pub tool_types: Vec<String>,
    pub token_count: u64,
    body: Value,
}

impl RequestEnvelope {
    pub fn new(protocol: Protocol, body: Value) -> Self {
        let model = body.get("model").and_then(Value::as_str).map(String::from);
        let system = body
            .get("system")
            .filter(|s| truthy(s))
            .cloned()
            .map(Content::from);
        let stream = body.get("stream").is_some_and(truthy);
        let thinking = body.get("thinking").is_some_and(|t| {
            truthy(t) && t.get("type").and_then(Value::as_str) != Some("disabled")
        });
        let tool_types = body
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("type").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let token_count = estimate_tokens(messages_of(&body), system.as_ref());

        Self {
            protocol,
            model,
            system,
            stream,
            thinking,
            tool_types,
            token_count,
            body,
        }
    }

    /// The messages exactly as the client sent them.
    pub fn messages(&self) -> &[Value] {
        messages_of(&self.body)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

fn messages_of(body: &Value) -> &[Value] {
    body.get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
