//! State machines that re-emit one format's streaming events in the other's grammar.
//!
//! Translators are fed the `data` field of each upstream SSE event, in arrival order,
//! and return the frames to write to the client. Event-boundary parsing happens before
//! this layer (see `relay`), so these are plain synchronous functions over strings.
//! One translator serves exactly one response.

use serde::Serialize;
use serde_json::Value;

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, StreamEvent, UpstreamEvent, Usage,
};
use super::content::{Content, Part};
use super::openai_types::{ChatCompletionChunk, Choice, ChoiceMessage};

/// The `OpenAI` end-of-stream sentinel.
pub const DONE: &str = "[DONE]";

/// One outbound SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    fn json(event: Option<&'static str>, payload: &impl Serialize) -> Self {
        Self {
            event,
            data: serde_json::to_string(payload).unwrap_or_default(),
        }
    }

    fn done() -> Self {
        Self {
            event: None,
            data: DONE.to_string(),
        }
    }

    /// The frame as it appears on the wire.
    pub fn to_wire(&self) -> String {
        match self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

pub trait FrameTranslator: Send {
    /// Handle one upstream event's data payload.
    fn on_data(&mut self, data: &str) -> Vec<SseFrame>;

    /// Upstream ended. Emits whatever terminal frames the client has not seen yet.
    fn finish(&mut self) -> Vec<SseFrame>;

    /// Token usage reported by the upstream so far.
    fn usage(&self) -> Usage;
}

// ---------------------------------------------------------------------------
// OpenAI -> Anthropic
// ---------------------------------------------------------------------------

/// Turns `chat.completion.chunk` events into Anthropic `message_*`/`content_block_*` events.
///
/// ```text
/// not_started --first content delta--> started --[DONE] or end--> finished
/// ```
#[derive(Debug)]
pub struct OpenAiToAnthropic {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    stop_reason: Option<String>,
    usage: Usage,
}

impl OpenAiToAnthropic {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4()),
            started: false,
            finished: false,
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    fn start_frames(&self) -> [SseFrame; 2] {
        let message_start = StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                content: Content::Parts(Vec::new()),
                stop_reason: None,
                usage: Some(Usage {
                    input_tokens: self.usage.input_tokens,
                    output_tokens: 0,
                }),
            },
        };
        let block_start = StreamEvent::ContentBlockStart {
            index: 0,
            content_block: Part::text(""),
        };
        [event_frame(&message_start), event_frame(&block_start)]
    }
}

impl FrameTranslator for OpenAiToAnthropic {
    fn on_data(&mut self, data: &str) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        if data.trim() == DONE {
            return self.finish();
        }

        let Ok(value) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("Skipping malformed upstream stream event");
            return Vec::new();
        };
        let chunk = ChatCompletionChunk::from_value(&value);

        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Vec::new();
        };
        if let Some(reason) = choice.finish_reason {
            self.stop_reason = Some(reason);
        }
        let Some(text) = choice.delta.and_then(|d| d.content) else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if !self.started {
            frames.extend(self.start_frames());
            self.started = true;
        }
        frames.push(event_frame(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta { text },
        }));
        frames
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();
        if self.started {
            frames.push(event_frame(&StreamEvent::ContentBlockStop { index: 0 }));
            frames.push(event_frame(&StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(
                        self.stop_reason
                            .clone()
                            .unwrap_or_else(|| "stop".to_string()),
                    ),
                },
                usage: DeltaUsage {
                    output_tokens: self.usage.output_tokens,
                },
            }));
        }
        frames.push(event_frame(&StreamEvent::MessageStop));
        frames
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

fn event_frame(event: &StreamEvent) -> SseFrame {
    SseFrame::json(Some(event.event_name()), event)
}

// ---------------------------------------------------------------------------
// Anthropic -> OpenAI
// ---------------------------------------------------------------------------

/// Turns Anthropic stream events into `chat.completion.chunk`s terminated by `[DONE]`.
#[derive(Debug)]
pub struct AnthropicToOpenAi {
    model: String,
    id: String,
    created: i64,
    started: bool,
    done: bool,
    usage: Usage,
}

impl AnthropicToOpenAi {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            id: format!("chatcmpl_{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            started: false,
            done: false,
            usage: Usage::default(),
        }
    }

    fn chunk(&self, delta: ChoiceMessage, finish_reason: Option<String>) -> SseFrame {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: None,
                delta: Some(delta),
                finish_reason,
            }],
            usage: None,
        };
        SseFrame::json(None, &chunk)
    }
}

impl FrameTranslator for AnthropicToOpenAi {
    fn on_data(&mut self, data: &str) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("Skipping malformed upstream stream event");
            return Vec::new();
        };
        let event: UpstreamEvent = serde_json::from_value(value).unwrap_or_default();

        let mut frames = Vec::new();
        match event.event_type.as_str() {
            "message_start" => {
                if let Some(usage) = event.message.and_then(|m| m.usage) {
                    self.usage.input_tokens = usage.input_tokens;
                }
            }
            "content_block_delta" => {
                if !self.started {
                    frames.push(self.chunk(
                        ChoiceMessage {
                            role: Some("assistant".to_string()),
                            content: Some(String::new()),
                        },
                        None,
                    ));
                    self.started = true;
                }
                let text = event.delta.and_then(|d| d.text).unwrap_or_default();
                if !text.is_empty() {
                    frames.push(self.chunk(
                        ChoiceMessage {
                            role: None,
                            content: Some(text),
                        },
                        None,
                    ));
                }
            }
            "message_delta" => {
                if let Some(usage) = event.usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                if let Some(reason) = event.delta.and_then(|d| d.stop_reason) {
                    frames.push(self.chunk(ChoiceMessage::default(), Some(reason)));
                }
            }
            "message_stop" => frames.extend(self.finish()),
            _ => {}
        }
        frames
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![SseFrame::done()]
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}
