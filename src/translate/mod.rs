//! API translation between Anthropic and `OpenAI` formats.
//!
//! Converts requests, responses, and streaming events between the two API formats.
//! All translation functions are pure (no I/O) and total over any JSON input.

pub mod anthropic_types;
pub mod content;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
