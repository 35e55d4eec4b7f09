//! Error types for the router.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No matching provider found for route {route:?}")]
    NoProvider { route: Option<String> },

    #[error("Missing API key for provider {provider}")]
    MissingApiKey { provider: String },

    #[error("Upstream transport error: {message}")]
    Transport { message: String },

    #[error("Upstream request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Every candidate in the fallback chain failed at the transport level.
    #[error("Failed to reach provider ({})", failures.join("; "))]
    Exhausted {
        failures: Vec<String>,
        timed_out: bool,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn no_provider(route: Option<&str>) -> Self {
        Self::NoProvider {
            route: route.map(str::to_string),
        }
    }

    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey {
            provider: provider.into(),
        }
    }

    pub fn transport(err: &reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Transport-level failures are the only ones that walk the fallback chain.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoProvider { .. } | Self::MissingApiKey { .. } => 400,
            Self::Timeout { .. } | Self::Exhausted { timed_out: true, .. } => 504,
            Self::Transport { .. } | Self::Exhausted { .. } => 502,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
