//! Translate request bodies between the Anthropic Messages and `OpenAI` Chat Completions formats.
//!
//! Both directions are total: odd shapes are coerced to text (see [`Content::flatten`])
//! instead of being dropped, and malformed tool entries are skipped.

use serde_json::{json, Value};

use super::anthropic_types::{Message, MessagesRequest, Tool};
use super::content::{truthy, Content, Part};
use super::openai_types::{ChatCompletionRequest, ChatFunction, ChatMessage, ChatTool};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
pub fn anthropic_to_openai(req: &MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    let system = req
        .system
        .as_ref()
        .map(|s| s.flatten("\n"))
        .unwrap_or_default();
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Content::Text(system),
        });
    }

    messages.extend(req.messages.iter().map(|msg| ChatMessage {
        role: msg.role.clone(),
        content: Content::Text(msg.content.flatten("")),
    }));

    let tools = req
        .tools
        .as_ref()
        .map(|tools| {
            tools
                .iter()
                .filter(|t| !t.name.is_empty())
                .map(tool_to_openai)
                .collect()
        });

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        stream: Some(Value::Bool(req.stream.as_ref().is_some_and(truthy))),
        temperature: req.temperature.clone(),
        max_tokens: req.max_tokens.clone(),
        top_p: req.top_p.clone().filter(|v| !v.is_null()),
        tools,
        tool_choice: req.tool_choice.clone().filter(truthy),
        metadata: req.metadata.clone().filter(truthy),
    }
}

/// Translate an `OpenAI` Chat Completions request into an Anthropic Messages API request.
/// System-role messages are lifted into the top-level `system` string.
pub fn openai_to_anthropic(req: &ChatCompletionRequest) -> MessagesRequest {
    let system = req
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.flatten(""))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = req
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| Message {
            role: m.role.clone(),
            content: match &m.content {
                Content::Text(text) => Content::Text(text.clone()),
                Content::Parts(parts) => Content::Parts(
                    parts.iter().map(|part| Part::text(part.flatten())).collect(),
                ),
                Content::Unknown(_) => Content::Text(m.content.flatten("")),
            },
        })
        .collect();

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter(|t| t.tool_type == "function" && !t.function.name.is_empty())
            .map(tool_to_anthropic)
            .collect()
    });

    MessagesRequest {
        model: req.model.clone(),
        messages,
        system: (!system.is_empty()).then_some(Content::Text(system)),
        stream: Some(Value::Bool(req.stream.as_ref().is_some_and(truthy))),
        max_tokens: req.max_tokens.clone(),
        temperature: req.temperature.clone(),
        top_p: req.top_p.clone().filter(|v| !v.is_null()),
        tools,
        tool_choice: req.tool_choice.clone().filter(truthy),
        metadata: req.metadata.clone().filter(truthy),
    }
}

fn tool_to_openai(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: Some(tool.description.clone().unwrap_or_default()),
            parameters: Some(tool.input_schema.clone().unwrap_or_else(|| json!({}))),
        },
    }
}

fn tool_to_anthropic(tool: &ChatTool) -> Tool {
    Tool {
        name: tool.function.name.clone(),
        description: Some(tool.function.description.clone().unwrap_or_default()),
        input_schema: Some(
            tool.function
                .parameters
                .clone()
                .filter(|p| !p.is_null())
                .unwrap_or_else(|| json!({})),
        ),
    }
}
