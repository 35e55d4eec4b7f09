//! Translate buffered response bodies between the two formats.
//!
//! `finish_reason` and `stop_reason` are carried verbatim; clients of this router
//! accept either vocabulary.

use serde_json::Value;
use uuid::Uuid;

use super::anthropic_types::{MessagesResponse, Usage};
use super::content::{Content, Part};
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};

const DEFAULT_STOP_REASON: &str = "stop";

/// Translate an `OpenAI` Chat Completion response into an Anthropic Messages response.
/// `fallback_model` is used when the upstream body names no model.
pub fn openai_response_to_anthropic(body: &Value, fallback_model: &str) -> MessagesResponse {
    let resp = ChatCompletionResponse::from_value(body);
    let choice = resp.choices.first();

    let text = choice
        .and_then(|c| {
            let from_message = c.message.as_ref().and_then(|m| m.content.clone());
            from_message
                .filter(|t| !t.is_empty())
                .or_else(|| c.delta.as_ref().and_then(|d| d.content.clone()))
        })
        .unwrap_or_default();

    let stop_reason = choice
        .and_then(|c| c.finish_reason.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

    let usage = resp.usage.unwrap_or_default();

    MessagesResponse {
        id: non_empty_or(resp.id, || format!("msg_{}", Uuid::new_v4())),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        model: non_empty_or(resp.model, || fallback_model.to_string()),
        content: Content::Parts(vec![Part::text(text)]),
        stop_reason: Some(stop_reason),
        usage: Some(Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }),
    }
}

/// Translate an Anthropic Messages response into an `OpenAI` Chat Completion response.
pub fn anthropic_response_to_openai(body: &Value, fallback_model: &str) -> ChatCompletionResponse {
    let resp = MessagesResponse::from_value(body);
    let usage = resp.usage.unwrap_or_default();

    let stop_reason = resp
        .stop_reason
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

    ChatCompletionResponse {
        id: non_empty_or(resp.id, || format!("chatcmpl_{}", Uuid::new_v4())),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: non_empty_or(resp.model, || fallback_model.to_string()),
        choices: vec![Choice {
            index: 0,
            message: Some(ChoiceMessage {
                role: Some("assistant".to_string()),
                content: Some(resp.content.flatten("")),
            }),
            delta: None,
            finish_reason: Some(stop_reason),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }),
    }
}

fn non_empty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}
