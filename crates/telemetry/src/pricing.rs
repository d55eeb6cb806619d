//! Price table and cost estimation for LLM calls.
//!
//! Rates are in USD per 1000 tokens, keyed by `provider/model`, with
//! separate tiers for input, output, cache-read and cache-creation tokens.
//! The table is plain owned data: build it from defaults plus config
//! overrides and hand it to the recorder. There is no process-wide pricing
//! state, so cost computation stays deterministic and testable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-1000-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    /// USD per 1k input tokens.
    pub input_per_1k: f64,
    /// USD per 1k output tokens.
    pub output_per_1k: f64,
    /// USD per 1k tokens read from the provider prompt cache.
    #[serde(default)]
    pub cache_read_per_1k: f64,
    /// USD per 1k tokens written to the provider prompt cache.
    #[serde(default)]
    pub cache_creation_per_1k: f64,
}

impl ModelRate {
    /// A rate with no cache tiers.
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
            cache_read_per_1k: 0.0,
            cache_creation_per_1k: 0.0,
        }
    }

    /// Add cache-read / cache-creation tiers.
    pub fn with_cache(mut self, read_per_1k: f64, creation_per_1k: f64) -> Self {
        self.cache_read_per_1k = read_per_1k;
        self.cache_creation_per_1k = creation_per_1k;
        self
    }

    /// Cost in USD for the given token counts: `Σ tokens_tier × rate_tier / 1000`.
    pub fn cost(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
        cache_creation_tokens: u32,
    ) -> f64 {
        (input_tokens as f64 * self.input_per_1k
            + output_tokens as f64 * self.output_per_1k
            + cache_read_tokens as f64 * self.cache_read_per_1k
            + cache_creation_tokens as f64 * self.cache_creation_per_1k)
            / 1000.0
    }
}

/// Rates keyed by lowercase `provider/model`.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    rates: HashMap<String, ModelRate>,
}

impl PriceTable {
    /// An empty table (every lookup misses).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table pre-loaded with well-known model rates.
    pub fn with_defaults() -> Self {
        let mut table = Self::default();

        // ── OpenAI ─────────────────────────────────────────────────
        table.set("openai", "gpt-4", ModelRate::new(0.03, 0.06));
        table.set("openai", "gpt-4-turbo", ModelRate::new(0.01, 0.03));
        table.set("openai", "gpt-4o", ModelRate::new(0.0025, 0.01));
        table.set("openai", "gpt-4o-mini", ModelRate::new(0.00015, 0.0006));
        table.set("openai", "o1", ModelRate::new(0.015, 0.06));
        table.set("openai", "o3-mini", ModelRate::new(0.0011, 0.0044));
        table.set("openai", "text-embedding-3-small", ModelRate::new(0.00002, 0.0));
        table.set("openai", "text-embedding-3-large", ModelRate::new(0.00013, 0.0));

        // ── Anthropic ──────────────────────────────────────────────
        table.set(
            "anthropic",
            "claude-sonnet-4",
            ModelRate::new(0.003, 0.015).with_cache(0.0003, 0.00375),
        );
        table.set(
            "anthropic",
            "claude-opus-4",
            ModelRate::new(0.015, 0.075).with_cache(0.0015, 0.01875),
        );
        table.set(
            "anthropic",
            "claude-3.5-sonnet",
            ModelRate::new(0.003, 0.015).with_cache(0.0003, 0.00375),
        );
        table.set(
            "anthropic",
            "claude-3.5-haiku",
            ModelRate::new(0.0008, 0.004).with_cache(0.00008, 0.001),
        );

        // ── Google ─────────────────────────────────────────────────
        table.set("google", "gemini-2.0-flash", ModelRate::new(0.0001, 0.0004));
        table.set("google", "gemini-1.5-pro", ModelRate::new(0.00125, 0.005));
        table.set("google", "gemini-1.5-flash", ModelRate::new(0.000075, 0.0003));

        // ── Mistral ────────────────────────────────────────────────
        table.set("mistral", "mistral-large", ModelRate::new(0.002, 0.006));
        table.set("mistral", "mistral-small", ModelRate::new(0.0002, 0.0006));

        // ── DeepSeek ───────────────────────────────────────────────
        table.set("deepseek", "deepseek-v3", ModelRate::new(0.00027, 0.0011));
        table.set("deepseek", "deepseek-r1", ModelRate::new(0.00055, 0.00219));

        // ── Meta ───────────────────────────────────────────────────
        table.set("meta-llama", "llama-3.1-70b", ModelRate::new(0.00052, 0.00075));
        table.set("meta-llama", "llama-3.1-8b", ModelRate::new(0.000055, 0.000055));

        table
    }

    /// Add or replace the rate for a (provider, model) pair.
    pub fn set(&mut self, provider: &str, model: &str, rate: ModelRate) {
        self.rates.insert(Self::key(provider, model), rate);
    }

    /// Exact lookup for a (provider, model) pair.
    pub fn get(&self, provider: &str, model: &str) -> Option<&ModelRate> {
        self.rates.get(&Self::key(provider, model))
    }

    /// Estimate the cost of a call in USD, or `None` when no price entry
    /// exists for the pair. A miss is not an error; the caller decides how
    /// to surface it.
    ///
    /// Lookup is forgiving about model naming: exact `provider/model` first,
    /// then the model alone when it already carries a `provider/` prefix,
    /// then the longest same-provider entry whose model name is a prefix of
    /// the queried one (providers often report version-suffixed ids such as
    /// `gpt-4o-mini-2024-07-18`).
    pub fn estimate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
        cache_creation_tokens: u32,
    ) -> Option<f64> {
        self.lookup(provider, model).map(|rate| {
            rate.cost(
                input_tokens,
                output_tokens,
                cache_read_tokens,
                cache_creation_tokens,
            )
        })
    }

    fn lookup(&self, provider: &str, model: &str) -> Option<&ModelRate> {
        if let Some(rate) = self.rates.get(&Self::key(provider, model)) {
            return Some(rate);
        }

        // Model ids that already carry a provider prefix.
        let model_lower = model.to_lowercase();
        if model_lower.contains('/') {
            if let Some(rate) = self.rates.get(model_lower.as_str()) {
                return Some(rate);
            }
        }

        // Version-suffixed ids: longest same-provider prefix wins.
        let provider_prefix = format!("{}/", provider.to_lowercase());
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);
        let mut best: Option<(&str, &ModelRate)> = None;
        for (key, rate) in &self.rates {
            let Some(entry_model) = key.strip_prefix(&provider_prefix) else {
                continue;
            };
            if bare_model.starts_with(entry_model)
                && best.is_none_or(|(prev, _)| entry_model.len() > prev.len())
            {
                best = Some((entry_model, rate));
            }
        }
        best.map(|(_, rate)| rate)
    }

    /// All known `provider/model` keys, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rates.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    fn key(provider: &str, model: &str) -> String {
        format!("{}/{}", provider.to_lowercase(), model.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt4_reference_cost() {
        let table = PriceTable::with_defaults();
        // 1000 × 0.03/1k + 500 × 0.06/1k = 0.03 + 0.03 = 0.06
        let cost = table.estimate("openai", "gpt-4", 1000, 500, 0, 0).unwrap();
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn miss_returns_none_not_zero() {
        let table = PriceTable::with_defaults();
        assert!(table.estimate("acme", "frontier-1", 1000, 500, 0, 0).is_none());
    }

    #[test]
    fn cache_tiers_are_billed() {
        let table = PriceTable::with_defaults();
        // claude-sonnet-4: input 0.003, output 0.015, read 0.0003, creation 0.00375
        let cost = table
            .estimate("anthropic", "claude-sonnet-4", 1000, 1000, 2000, 1000)
            .unwrap();
        let expected =
            (1000.0 * 0.003 + 1000.0 * 0.015 + 2000.0 * 0.0003 + 1000.0 * 0.00375) / 1000.0;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn version_suffixed_model_matches_prefix() {
        let table = PriceTable::with_defaults();
        let exact = table.estimate("openai", "gpt-4o-mini", 1000, 0, 0, 0).unwrap();
        let suffixed = table
            .estimate("openai", "gpt-4o-mini-2024-07-18", 1000, 0, 0, 0)
            .unwrap();
        assert!((exact - suffixed).abs() < 1e-12);
    }

    #[test]
    fn prefix_match_prefers_longest_entry() {
        let mut table = PriceTable::empty();
        table.set("openai", "gpt-4", ModelRate::new(0.03, 0.06));
        table.set("openai", "gpt-4o", ModelRate::new(0.0025, 0.01));
        // "gpt-4o-2024-08-06" should match gpt-4o, not gpt-4.
        let cost = table
            .estimate("openai", "gpt-4o-2024-08-06", 1000, 0, 0, 0)
            .unwrap();
        assert!((cost - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn provider_prefixed_model_id() {
        let table = PriceTable::with_defaults();
        let cost = table
            .estimate("openrouter", "anthropic/claude-sonnet-4", 1000, 0, 0, 0)
            .unwrap();
        assert!((cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = PriceTable::with_defaults();
        assert!(table.estimate("OpenAI", "GPT-4", 10, 10, 0, 0).is_some());
    }

    #[test]
    fn set_overrides_existing_rate() {
        let mut table = PriceTable::with_defaults();
        table.set("openai", "gpt-4", ModelRate::new(0.05, 0.1));
        let cost = table.estimate("openai", "gpt-4", 1000, 0, 0, 0).unwrap();
        assert!((cost - 0.05).abs() < 1e-12);
        assert_eq!(table.get("openai", "gpt-4").unwrap().output_per_1k, 0.1);
    }

    #[test]
    fn models_sorted_and_counted() {
        let table = PriceTable::with_defaults();
        let models = table.models();
        assert!(models.len() >= 15);
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
        assert!(models.contains(&"openai/gpt-4".to_string()));
        assert!(!table.is_empty());
        assert_eq!(table.len(), models.len());
    }

    #[test]
    fn zero_tokens_cost_zero() {
        let rate = ModelRate::new(0.03, 0.06).with_cache(0.003, 0.0375);
        assert_eq!(rate.cost(0, 0, 0, 0), 0.0);
    }
}
