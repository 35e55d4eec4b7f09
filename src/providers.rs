//! Provider profiles: wire-format inference, outbound headers and built-in presets.
//!
//! A provider's protocol is never declared; it is inferred from its name, its
//! endpoint and its transformer hints. Presets fill in the endpoint and the API
//! key variable for well-known providers so a config only needs their name.

use crate::config::ProviderConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire protocol family, for both clients and upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Anthropic,
    OpenAi,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the provider's protocol: name, then endpoint, then transformer hints.
pub fn infer_format(provider: &ProviderConfig) -> Protocol {
    let name = provider.name.to_lowercase();
    if name == "anthropic" || name == "glm" {
        return Protocol::Anthropic;
    }

    let url = provider.endpoint().unwrap_or_default();
    if url.contains("/v1/messages") || url.contains("/anthropic") {
        return Protocol::Anthropic;
    }

    if provider
        .transformer_names()
        .any(|t| t.eq_ignore_ascii_case("anthropic"))
    {
        return Protocol::Anthropic;
    }

    Protocol::OpenAi
}

/// Outbound headers for a provider. `api_key` is `None` when no key resolved;
/// such a provider must not be dispatched to.
#[derive(Debug, Clone)]
pub struct ProviderHeaders {
    pub headers: HeaderMap,
    pub api_key: Option<String>,
}

pub fn build_headers(provider: &ProviderConfig) -> ProviderHeaders {
    let api_key = provider.resolve_api_key();
    let name = provider.name.to_lowercase();
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(ref key) = api_key {
        let header_name = provider.api_key_header.clone().unwrap_or_else(|| {
            if name == "gemini" {
                "x-goog-api-key".to_string()
            } else {
                AUTHORIZATION.as_str().to_string()
            }
        });
        let value = if header_name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
            format!("Bearer {key}")
        } else {
            key.clone()
        };
        insert_header(&mut headers, &header_name, &value);
    }

    for (key, value) in &provider.headers {
        insert_header(&mut headers, key, value);
    }

    if infer_format(provider) == Protocol::Anthropic && !headers.contains_key("anthropic-version")
    {
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
    }

    if name == "openrouter" {
        let referer = provider
            .referer
            .clone()
            .or_else(|| std::env::var("OPENROUTER_REFERRER").ok());
        let title = provider
            .app_name
            .clone()
            .or_else(|| std::env::var("OPENROUTER_APP_NAME").ok());
        if let Some(referer) = referer {
            insert_header(&mut headers, "http-referer", &referer);
        }
        if let Some(title) = title {
            insert_header(&mut headers, "x-title", &title);
        }
    }

    ProviderHeaders { headers, api_key }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.to_lowercase().as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = name, "Skipping invalid provider header"),
    }
}

/// Built-in provider presets. Each preset gives the full completion endpoint and the
/// environment variable holding the key, used when the config omits them.
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        endpoint: "https://api.openai.com/v1/chat/completions",
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        endpoint: "https://openrouter.ai/api/v1/chat/completions",
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        endpoint: "https://api.fireworks.ai/inference/v1/chat/completions",
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "grok",
        endpoint: "https://api.x.ai/v1/chat/completions",
        default_api_key_env: "XAI_API_KEY",
    },
    ProviderPreset {
        name: "together",
        endpoint: "https://api.together.xyz/v1/chat/completions",
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        endpoint: "https://api.groq.com/openai/v1/chat/completions",
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        endpoint: "https://api.deepseek.com/chat/completions",
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "gemini",
        endpoint: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        default_api_key_env: "GEMINI_API_KEY",
    },
    ProviderPreset {
        name: "anthropic",
        endpoint: "https://api.anthropic.com/v1/messages",
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}
