//! Per-request telemetry: the record the dispatcher emits, where it goes, and what it costs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ModelPrice, RouterConfig};

/// One record per attempt sequence, describing the route that actually served
/// (or last failed to serve) the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub cost: f64,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &TelemetryRecord);
}

pub trait Pricing: Send + Sync {
    /// Cost in dollars of a call; unknown provider/model pairs cost nothing.
    fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64;
}

/// Built-in per-million-token prices, with config overrides layered on top.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, HashMap<String, ModelPrice>>,
}

const BUILTIN_PRICES: &[(&str, &[(&str, f64, f64)])] = &[
    (
        "openai",
        &[
            ("gpt-4o", 5.0, 15.0),
            ("gpt-4-turbo", 10.0, 30.0),
            ("gpt-4o-mini", 0.15, 0.6),
            ("o1", 15.0, 60.0),
            ("o1-mini", 3.0, 12.0),
        ],
    ),
    (
        "anthropic",
        &[
            ("claude-sonnet-4-latest", 15.0, 75.0),
            ("claude-3-5-sonnet-latest", 3.0, 15.0),
            ("claude-3-5-haiku-latest", 1.0, 5.0),
        ],
    ),
    (
        "gemini",
        &[
            ("gemini-2.5-flash", 0.075, 0.30),
            ("gemini-2.5-pro", 1.25, 5.0),
            ("gemini-2.0-flash", 0.075, 0.30),
        ],
    ),
    (
        "qwen",
        &[
            ("qwen-plus", 0.5, 2.0),
            ("qwen-max", 2.0, 6.0),
            ("qwen-turbo", 0.3, 0.6),
            ("qwen3-coder-plus", 2.0, 6.0),
        ],
    ),
    (
        "glm",
        &[
            ("glm-4.6", 0.5, 2.0),
            ("glm-4.5", 0.5, 2.0),
            ("glm-4-plus", 1.0, 2.0),
        ],
    ),
    (
        "openrouter",
        &[
            ("deepseek/deepseek-chat", 0.14, 0.28),
            ("meta-llama/llama-3.2-3b-instruct", 0.10, 0.10),
        ],
    ),
];

impl Default for PriceTable {
    fn default() -> Self {
        let prices = BUILTIN_PRICES
            .iter()
            .map(|(provider, models)| {
                let models = models
                    .iter()
                    .map(|(model, input, output)| {
                        (
                            (*model).to_string(),
                            ModelPrice {
                                input: *input,
                                output: *output,
                            },
                        )
                    })
                    .collect();
                ((*provider).to_string(), models)
            })
            .collect();
        Self { prices }
    }
}

impl PriceTable {
    /// The built-in table with `[pricing.<provider>.<model>]` entries applied over it.
    pub fn from_config(config: &RouterConfig) -> Self {
        let mut table = Self::default();
        for (provider, models) in &config.pricing {
            let entry = table.prices.entry(provider.to_lowercase()).or_default();
            for (model, price) in models {
                entry.insert(model.clone(), *price);
            }
        }
        table
    }
}

impl Pricing for PriceTable {
    fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.prices
            .get(&provider.to_lowercase())
            .and_then(|models| models.get(model))
            .map_or(0.0, |price| {
                (input_tokens as f64 * price.input + output_tokens as f64 * price.output)
                    / 1_000_000.0
            })
    }
}

/// Sink and pricing injected into the dispatcher.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
    pricing: Arc<dyn Pricing>,
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>, pricing: Arc<dyn Pricing>) -> Self {
        Self { sink, pricing }
    }

    /// The same sink, priced by `pricing`.
    pub fn with_pricing(&self, pricing: Arc<dyn Pricing>) -> Self {
        Self {
            sink: self.sink.clone(),
            pricing,
        }
    }

    pub fn emit(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
        success: bool,
    ) {
        let cost = if success {
            self.pricing.cost(provider, model, input_tokens, output_tokens)
        } else {
            0.0
        };
        self.sink.record(&TelemetryRecord {
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            latency_ms,
            success,
            cost,
        });
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}
