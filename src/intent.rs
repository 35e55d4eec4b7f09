//! Keyword intent router: a rules-file implementation of [`CustomRouter`].
//!
//! Each intent names a route and a set of regex patterns. The user and system message
//! text is scored by how many times each intent's patterns match, and the best-scoring
//! intent's route is suggested. Rules are compiled once at startup.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RouterConfig;
use crate::envelope::RequestEnvelope;
use crate::error::{ProxyError, Result};
use crate::route::CustomRouter;

const DEFAULT_SCAN_CHARS: usize = 3000;

#[derive(Debug, Deserialize)]
struct IntentFile {
    #[serde(default = "default_scan_chars")]
    scan_chars: usize,
    #[serde(default)]
    intents: Vec<IntentRule>,
}

#[derive(Debug, Deserialize)]
struct IntentRule {
    name: String,
    route: String,
    patterns: Vec<String>,
}

fn default_scan_chars() -> usize {
    DEFAULT_SCAN_CHARS
}

#[derive(Debug)]
struct Intent {
    name: String,
    route: String,
    patterns: Vec<Regex>,
}

#[derive(Debug)]
pub struct IntentRouter {
    scan_chars: usize,
    intents: Vec<Intent>,
}

impl IntentRouter {
    /// Load rules from TOML, or JSON when the extension is `.json`. Invalid patterns are
    /// a config error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read router rules {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let file: IntentFile = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Self::compile(file)
    }

    /// [`IntentRouter::load`] for a path that may not hold usable rules. A missing file
    /// or one that is neither `.toml` nor `.json` is logged and skipped; a rules file
    /// that exists but does not parse or compile is still an error.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            tracing::warn!(
                path = %path.display(),
                "Router rules file not found, custom routing disabled"
            );
            return Ok(None);
        }
        let supported = path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("toml") || ext.eq_ignore_ascii_case("json")
        });
        if !supported {
            tracing::warn!(
                path = %path.display(),
                "Router rules must be a .toml or .json file, custom routing disabled"
            );
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    fn compile(file: IntentFile) -> Result<Self> {
        let intents = file
            .intents
            .into_iter()
            .map(|rule| {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            ProxyError::config(format!(
                                "Intent '{}': bad pattern {p:?}: {e}",
                                rule.name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Intent {
                    name: rule.name,
                    route: rule.route,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            scan_chars: file.scan_chars,
            intents,
        })
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// The best-scoring intent's name and route. Ties go to the intent declared first.
    pub fn classify(&self, text: &str) -> Option<(&str, &str)> {
        let mut best: Option<(&Intent, usize)> = None;
        for intent in &self.intents {
            let score: usize = intent
                .patterns
                .iter()
                .map(|p| p.find_iter(text).count())
                .sum();
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((intent, score));
            }
        }
        best.map(|(intent, _)| (intent.name.as_str(), intent.route.as_str()))
    }

    fn scan_text(&self, request: &RequestEnvelope) -> String {
        request
            .messages()
            .iter()
            .filter(|m| matches!(m.get("role").and_then(Value::as_str), Some("user" | "system")))
            .map(|m| match m.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(self.scan_chars)
            .collect()
    }
}

impl CustomRouter for IntentRouter {
    fn route(
        &self,
        request: &RequestEnvelope,
        _config: &RouterConfig,
    ) -> anyhow::Result<Option<String>> {
        let text = self.scan_text(request);
        Ok(self.classify(&text).map(|(name, route)| {
            tracing::debug!(intent = name, route, "Intent matched");
            route.to_string()
        }))
    }
}
