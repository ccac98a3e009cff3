//! Per-model pricing table.
//!
//! Prices are USD per 1K tokens for chat and embedding models, and USD per
//! audio minute for transcription models. Unknown models fall back to a
//! default entry so every call can be priced.
//!
//! Overrides use the same JSON shape, from a file (`PRICING_FILE`) and/or an
//! inline variable (`PRICING_OVERRIDES`, applied last):
//!
//! ```json
//! {
//!   "models": { "gpt-4o-mini": { "inputPer1K": 0.00015, "outputPer1K": 0.0006 } },
//!   "default": { "inputPer1K": 0.001, "outputPer1K": 0.002 },
//!   "audioPerMinute": { "whisper-1": 0.006 }
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use studyforge_core::{defaults, Error, Result, TokenUsage};

/// Token prices for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrice {
    #[serde(rename = "inputPer1K")]
    pub input_per_1k: f64,
    #[serde(rename = "outputPer1K", default)]
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Override document shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricingOverrides {
    #[serde(default)]
    models: HashMap<String, ModelPrice>,
    #[serde(default)]
    default: Option<ModelPrice>,
    #[serde(default)]
    audio_per_minute: HashMap<String, f64>,
}

/// Built-in prices.
const BUILTIN_MODELS: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", ModelPrice::new(0.000_15, 0.000_6)),
    ("gpt-4o", ModelPrice::new(0.002_5, 0.01)),
    ("gpt-4.1-nano", ModelPrice::new(0.000_1, 0.000_4)),
    ("gpt-4.1-mini", ModelPrice::new(0.000_4, 0.001_6)),
    ("gpt-4.1", ModelPrice::new(0.002, 0.008)),
    ("text-embedding-3-small", ModelPrice::new(0.000_02, 0.0)),
    ("text-embedding-3-large", ModelPrice::new(0.000_13, 0.0)),
];

/// Per-model price lookup with a fallback entry.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
    audio_per_minute: HashMap<String, f64>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut audio_per_minute = HashMap::new();
        audio_per_minute.insert(
            defaults::TRANSCRIBE_MODEL.to_string(),
            defaults::TRANSCRIBE_PER_MINUTE,
        );
        Self {
            models: BUILTIN_MODELS
                .iter()
                .map(|(name, price)| (name.to_string(), *price))
                .collect(),
            fallback: ModelPrice::new(
                defaults::FALLBACK_INPUT_PER_1K,
                defaults::FALLBACK_OUTPUT_PER_1K,
            ),
            audio_per_minute,
        }
    }
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table with `PRICING_FILE` then `PRICING_OVERRIDES` applied.
    pub fn from_env() -> Result<Self> {
        let mut table = Self::default();

        if let Ok(path) = std::env::var("PRICING_FILE") {
            let raw = std::fs::read_to_string(&path)?;
            table.apply_overrides(&raw)?;
            info!(
                subsystem = "inference",
                component = "pricing",
                path = %path,
                "Loaded pricing overrides from file"
            );
        }
        if let Ok(raw) = std::env::var("PRICING_OVERRIDES") {
            table.apply_overrides(&raw)?;
            info!(
                subsystem = "inference",
                component = "pricing",
                "Applied inline pricing overrides"
            );
        }
        Ok(table)
    }

    /// Merge an override document into this table.
    pub fn apply_overrides(&mut self, raw: &str) -> Result<()> {
        let overrides: PricingOverrides = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid pricing overrides: {e}")))?;

        for (model, price) in overrides.models {
            if price.input_per_1k < 0.0 || price.output_per_1k < 0.0 {
                return Err(Error::Config(format!("Negative price for model {model}")));
            }
            self.models.insert(model, price);
        }
        if let Some(fallback) = overrides.default {
            self.fallback = fallback;
        }
        self.audio_per_minute.extend(overrides.audio_per_minute);
        Ok(())
    }

    /// Builder-style single-model override.
    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    /// Price for `model`.
    ///
    /// Exact match first, then the longest known prefix (so dated snapshots
    /// like `gpt-4o-mini-2024-07-18` price as their family), then the fallback.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.models.get(model) {
            return *price;
        }
        let by_prefix = self
            .models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price);

        by_prefix.unwrap_or_else(|| {
            debug!(
                subsystem = "inference",
                component = "pricing",
                model,
                "No price for model, using fallback"
            );
            self.fallback
        })
    }

    /// `(input_cost_usd, output_cost_usd)` for a call.
    pub fn price_tokens(&self, model: &str, usage: Option<TokenUsage>) -> (f64, f64) {
        let Some(usage) = usage else {
            return (0.0, 0.0);
        };
        let price = self.price_for(model);
        (
            usage.prompt_tokens as f64 / 1000.0 * price.input_per_1k,
            usage.completion_tokens as f64 / 1000.0 * price.output_per_1k,
        )
    }

    /// Cost of transcribing `duration_secs` of audio.
    pub fn price_audio(&self, model: &str, duration_secs: f64) -> f64 {
        let per_minute = self
            .audio_per_minute
            .get(model)
            .copied()
            .unwrap_or(defaults::TRANSCRIBE_PER_MINUTE);
        duration_secs.max(0.0) / 60.0 * per_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_exact_lookup() {
        let table = PricingTable::new();
        assert_eq!(table.price_for("gpt-4o-mini"), ModelPrice::new(0.000_15, 0.000_6));
    }

    #[test]
    fn test_prefix_lookup_prefers_longest() {
        let table = PricingTable::new();
        // "gpt-4o" is also a prefix; the longer family must win.
        assert_eq!(
            table.price_for("gpt-4o-mini-2024-07-18"),
            ModelPrice::new(0.000_15, 0.000_6)
        );
        assert_eq!(table.price_for("gpt-4o-2024-08-06"), ModelPrice::new(0.002_5, 0.01));
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = PricingTable::new();
        assert_eq!(
            table.price_for("llama3:8b"),
            ModelPrice::new(defaults::FALLBACK_INPUT_PER_1K, defaults::FALLBACK_OUTPUT_PER_1K)
        );
    }

    #[test]
    fn test_price_tokens() {
        let table = PricingTable::new();
        let (input, output) = table.price_tokens("gpt-4o-mini", Some(TokenUsage::new(2000, 500)));
        assert!(approx(input, 0.0003));
        assert!(approx(output, 0.0003));
    }

    #[test]
    fn test_price_tokens_without_usage_is_zero() {
        let table = PricingTable::new();
        assert_eq!(table.price_tokens("gpt-4o-mini", None), (0.0, 0.0));
    }

    #[test]
    fn test_price_audio() {
        let table = PricingTable::new();
        assert!(approx(table.price_audio("whisper-1", 90.0), 0.009));
        assert!(approx(table.price_audio("unknown-asr", 60.0), defaults::TRANSCRIBE_PER_MINUTE));
        assert_eq!(table.price_audio("whisper-1", -5.0), 0.0);
    }

    #[test]
    fn test_apply_overrides() {
        let mut table = PricingTable::new();
        table
            .apply_overrides(
                r#"{
                    "models": {"my-model": {"inputPer1K": 1.0, "outputPer1K": 2.0}},
                    "default": {"inputPer1K": 0.5, "outputPer1K": 0.5},
                    "audioPerMinute": {"whisper-1": 0.01}
                }"#,
            )
            .unwrap();

        assert_eq!(table.price_for("my-model"), ModelPrice::new(1.0, 2.0));
        assert_eq!(table.price_for("nothing-like-it"), ModelPrice::new(0.5, 0.5));
        assert!(approx(table.price_audio("whisper-1", 60.0), 0.01));
        // Built-ins survive a partial override.
        assert_eq!(table.price_for("gpt-4o"), ModelPrice::new(0.002_5, 0.01));
    }

    #[test]
    fn test_override_output_defaults_to_zero() {
        let mut table = PricingTable::new();
        table
            .apply_overrides(r#"{"models": {"embedder": {"inputPer1K": 0.1}}}"#)
            .unwrap();
        assert_eq!(table.price_for("embedder").output_per_1k, 0.0);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let mut table = PricingTable::new();
        assert!(matches!(
            table.apply_overrides("not json"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            table.apply_overrides(r#"{"models": {"x": {"inputPer1K": -1.0}}}"#),
            Err(Error::Config(_))
        ));
    }
}
