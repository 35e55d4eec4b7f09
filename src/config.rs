use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_LONG_CONTEXT_THRESHOLD: u64 = 60_000;

/// Full router configuration. The original router's JSON keys are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    #[serde(default = "default_timeout_ms", alias = "API_TIMEOUT_MS")]
    pub api_timeout_ms: u64,
    #[serde(default, alias = "LOG_LEVEL", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, alias = "CUSTOM_ROUTER_PATH", skip_serializing_if = "Option::is_none")]
    pub custom_router_path: Option<PathBuf>,
    #[serde(default, alias = "Providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default, alias = "Router")]
    pub router: RouterPolicy,
    /// Per-million-token prices keyed by provider then model.
    #[serde(default)]
    pub pricing: HashMap<String, HashMap<String, ModelPrice>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Literal key, or `$ENV_NAME` / `${ENV_NAME}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<TransformerConfig>,
}

/// Transformer hints. Entries may be plain names or `[name, options]` pairs;
/// only the plain names take part in format inference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(default, rename = "use")]
    pub uses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default, alias = "longContext", skip_serializing_if = "Option::is_none")]
    pub long_context: Option<String>,
    #[serde(
        default,
        alias = "longContextThreshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub long_context_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<String>,
    #[serde(default, alias = "webSearch", skip_serializing_if = "Option::is_none")]
    pub web_search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_timeout_ms() -> u64 {
    300_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_timeout_ms: default_timeout_ms(),
            log_level: None,
            custom_router_path: None,
            providers: Vec::new(),
            router: RouterPolicy::default(),
            pricing: HashMap::new(),
        }
    }
}

impl RouterConfig {
    /// Load config from a TOML file, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(config)
    }

    /// Find the config file to use.
    /// Priority: CLI arg > `CCR_CONFIG_PATH` > CWD > XDG config > home dir
    pub fn locate(explicit_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit_path {
            return Ok(path.to_path_buf());
        }

        let candidates = config_search_paths();
        if let Some(found) = candidates.iter().find(|c| c.exists()) {
            return Ok(found.clone());
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<(PathBuf, Self)> {
        let path = Self::locate(explicit_path)?;
        tracing::info!(path = %path.display(), "Loading config");
        let config = Self::load(&path)?;
        Ok((path, config))
    }

    pub fn long_context_threshold(&self) -> u64 {
        self.router
            .long_context_threshold
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_LONG_CONTEXT_THRESHOLD)
    }

    /// Case-insensitive provider lookup.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl ProviderConfig {
    /// Resolve the API key: literal, `$ENV_NAME`, `${ENV_NAME}`, or the preset's env var
    /// when no key is configured. Unset or empty variables resolve to `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        match self.api_key.as_deref() {
            Some(raw) => match env_reference(raw) {
                Some(var) => non_empty_env(var),
                None if raw.is_empty() => None,
                None => Some(raw.to_string()),
            },
            None => ProviderPreset::from_name(&self.name)
                .and_then(|preset| non_empty_env(preset.default_api_key_env)),
        }
    }

    /// The URL requests are POSTed to: the configured one, else the preset endpoint.
    pub fn endpoint(&self) -> Option<String> {
        self.api_base_url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| {
                ProviderPreset::from_name(&self.name).map(|preset| preset.endpoint.to_string())
            })
    }

    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn transformer_names(&self) -> impl Iterator<Item = &str> {
        self.transformer
            .iter()
            .flat_map(|t| t.uses.iter())
            .filter_map(serde_json::Value::as_str)
    }
}

fn env_reference(raw: &str) -> Option<&str> {
    let name = raw.strip_prefix('$')?;
    Some(
        name.strip_prefix('{')
            .and_then(|n| n.strip_suffix('}'))
            .unwrap_or(name),
    )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// A per-request view of the configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Fixed(Arc<RouterConfig>),
    /// Re-read on every request so edits apply without a restart.
    File(PathBuf),
}

impl ConfigSource {
    pub fn fixed(config: RouterConfig) -> Self {
        Self::Fixed(Arc::new(config))
    }

    pub fn snapshot(&self) -> Result<Arc<RouterConfig>> {
        match self {
            Self::Fixed(config) => Ok(Arc::clone(config)),
            Self::File(path) => RouterConfig::load(path).map(Arc::new),
        }
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(explicit) = std::env::var("CCR_CONFIG_PATH") {
        paths.push(PathBuf::from(explicit));
    }

    paths.push(PathBuf::from("claude-router.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("claude-router").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("claude-router").join("config.toml"));
        paths.push(home.join(".claude-code-router").join("config.json"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
