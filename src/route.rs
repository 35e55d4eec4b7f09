//! Route resolution: which `provider,model` pair serves a request.
//!
//! Resolution is a pure function of the request and the configuration snapshot.
//! The first matching rule wins:
//!
//! 1. explicit `provider,model` in the request's `model` field
//! 2. `<CCR-SUBAGENT-MODEL>` directive in the system prompt
//! 3. the injected [`CustomRouter`], if any
//! 4. long-context, thinking, web-search and background rules
//! 5. `router.default`

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::{ProviderConfig, RouterConfig};
use crate::envelope::RequestEnvelope;
use crate::translate::content::{truthy, Content};

static SUBAGENT_MODEL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)<CCR-SUBAGENT-MODEL>(.*?)</CCR-SUBAGENT-MODEL>").ok()
});

/// A pluggable routing strategy, consulted after the explicit and sub-agent overrides.
///
/// Returning `Ok(None)` or an empty route falls through to the static rules. Errors
/// and panics are logged and treated the same way.
pub trait CustomRouter: Send + Sync {
    fn route(&self, request: &RequestEnvelope, config: &RouterConfig)
        -> anyhow::Result<Option<String>>;
}

/// A resolved `provider,model` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub provider: String,
    pub model: String,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.provider, self.model)
    }
}

/// A route matched against the configured providers.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub provider: &'a ProviderConfig,
    pub model: &'a str,
}

impl Selection<'_> {
    pub fn route(&self) -> Route {
        Route {
            provider: self.provider.name.clone(),
            model: self.model.to_string(),
        }
    }
}

/// Coarse token estimate: a quarter of the character count of the system text and
/// every message's content, never below 1. Lengths are UTF-16 code units.
pub fn estimate_tokens(messages: &[Value], system: Option<&Content>) -> u64 {
    let system_text = system.map(|s| s.prose(" ")).unwrap_or_default();
    let message_text = messages
        .iter()
        .map(message_text)
        .collect::<Vec<_>>()
        .join(" ");

    let text = format!("{system_text} {message_text}");
    let length = text.encode_utf16().count() as u64;
    length.div_ceil(4).max(1)
}

fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(content) if truthy(content) => content.to_string(),
        // missing or falsy content stringifies as an empty JSON string
        _ => "\"\"".to_string(),
    }
}

/// Parse an explicit `provider,model` override. The model part may itself contain commas.
pub fn parse_explicit_route(model: &str) -> Option<Route> {
    let (provider, model) = model.split_once(',')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some(Route {
        provider: provider.to_string(),
        model: model.to_string(),
    })
}

/// The trimmed route inside the first `<CCR-SUBAGENT-MODEL>` directive, if any.
pub fn extract_subagent_model(system: &Content) -> Option<String> {
    let text = system.prose(" ");
    let captures = SUBAGENT_MODEL.as_ref()?.captures(&text)?;
    let route = captures.get(1)?.as_str().trim();
    (!route.is_empty()).then(|| route.to_string())
}

pub fn resolve_route(
    request: &RequestEnvelope,
    config: &RouterConfig,
    custom: Option<&dyn CustomRouter>,
) -> Option<String> {
    if let Some(route) = request.model.as_deref().and_then(parse_explicit_route) {
        tracing::debug!(%route, "Explicit route");
        return Some(route.to_string());
    }

    if let Some(route) = request.system.as_ref().and_then(extract_subagent_model) {
        tracing::debug!(%route, "Sub-agent route");
        return Some(route);
    }

    if let Some(router) = custom {
        if let Some(route) = consult(router, request, config) {
            tracing::debug!(%route, "Custom router route");
            return Some(route);
        }
    }

    let policy = &config.router;
    if request.token_count > config.long_context_threshold() {
        if let Some(route) = &policy.long_context {
            tracing::debug!(tokens = request.token_count, %route, "Long-context route");
            return Some(route.clone());
        }
    }

    if request.thinking {
        if let Some(route) = &policy.think {
            return Some(route.clone());
        }
    }

    if request.tool_types.iter().any(|t| t.starts_with("web_search")) {
        if let Some(route) = &policy.web_search {
            return Some(route.clone());
        }
    }

    if request.model.as_deref().is_some_and(|m| m.contains("haiku")) {
        if let Some(route) = &policy.background {
            return Some(route.clone());
        }
    }

    policy.default.clone()
}

fn consult(
    router: &dyn CustomRouter,
    request: &RequestEnvelope,
    config: &RouterConfig,
) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(|| router.route(request, config))) {
        Ok(Ok(route)) => route.filter(|r| !r.trim().is_empty()),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Custom router failed, using static rules");
            None
        }
        Err(_) => {
            tracing::warn!("Custom router panicked, using static rules");
            None
        }
    }
}

/// Match a route string against the configured providers (case-insensitive).
/// An empty model part selects the provider's first model.
pub fn pick_provider<'a>(route: &'a str, config: &'a RouterConfig) -> Option<Selection<'a>> {
    let (name, model) = route.split_once(',').unwrap_or((route, ""));
    let provider = config.provider(name.trim())?;
    let model = match model.trim() {
        "" => provider.default_model()?,
        model => model,
    };
    Some(Selection { provider, model })
}

/// Alternate routes to try after a transport failure, in order: `router.fallbacks`,
/// `router.default`, then each provider's first model. De-duplicated, and never `used`.
pub fn fallback_routes(config: &RouterConfig, used: &str) -> Vec<String> {
    let policy = &config.router;
    let provider_defaults = config
        .providers
        .iter()
        .filter_map(|p| p.default_model().map(|m| format!("{},{m}", p.name)));

    let mut routes: Vec<String> = Vec::new();
    for route in policy
        .fallbacks
        .iter()
        .cloned()
        .chain(policy.default.clone())
        .chain(provider_defaults)
    {
        if !route.is_empty() && route != used && !routes.contains(&route) {
            routes.push(route);
        }
    }
    routes
}
