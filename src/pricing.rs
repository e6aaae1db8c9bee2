//! # Pricing Module
//!
//! The detector treats cost as an opaque function of `(model, usage)`. This
//! module defines that seam ([`CostCalculator`]) and a static per-family
//! price table used by the binary.
//!
//! Prices can be overridden via environment variables (all four required):
//! - `CLAUDE_PRICE_INPUT`
//! - `CLAUDE_PRICE_OUTPUT`
//! - `CLAUDE_PRICE_CACHE_CREATE`
//! - `CLAUDE_PRICE_CACHE_READ`

use std::env;

use crate::models::TokenUsage;

/// Pure cost function consumed by the session builder.
pub trait CostCalculator {
    fn compute(&self, model: Option<&str>, usage: &TokenUsage) -> f64;
}

impl<F> CostCalculator for F
where
    F: Fn(Option<&str>, &TokenUsage) -> f64,
{
    fn compute(&self, model: Option<&str>, usage: &TokenUsage) -> f64 {
        self(model, usage)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pricing {
    pub in_per_tok: f64,
    pub out_per_tok: f64,
    pub cache_create_per_tok: f64,
    pub cache_read_per_tok: f64,
}

impl Pricing {
    // Cache write ≈ 1.25× input price; cache read ≈ 0.1× input price
    const fn family(in_per_tok: f64, out_per_tok: f64) -> Self {
        Self {
            in_per_tok,
            out_per_tok,
            cache_create_per_tok: in_per_tok * 1.25,
            cache_read_per_tok: in_per_tok * 0.1,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        usage.input as f64 * self.in_per_tok
            + usage.output as f64 * self.out_per_tok
            + usage.cache_create as f64 * self.cache_create_per_tok
            + usage.cache_read as f64 * self.cache_read_per_tok
    }
}

const OPUS: Pricing = Pricing::family(15e-6, 75e-6);
const SONNET: Pricing = Pricing::family(3e-6, 15e-6);
const HAIKU: Pricing = Pricing::family(0.25e-6, 1.25e-6);

// Known variants first, then family heuristics.
const MODEL_TABLE: &[(&str, Pricing)] = &[
    ("opus-4-1", OPUS),
    ("opus-4", OPUS),
    ("sonnet-4", SONNET),
    ("4-sonnet", SONNET),
    ("3-7-sonnet", SONNET),
    ("3-5-sonnet", SONNET),
    ("3-5-haiku", HAIKU),
    ("opus", OPUS),
    ("sonnet", SONNET),
    ("haiku", HAIKU),
];

fn env_pricing() -> Option<Pricing> {
    let read = |k: &str| env::var(k).ok().and_then(|s| s.trim().parse::<f64>().ok());
    Some(Pricing {
        in_per_tok: read("CLAUDE_PRICE_INPUT")?,
        out_per_tok: read("CLAUDE_PRICE_OUTPUT")?,
        cache_create_per_tok: read("CLAUDE_PRICE_CACHE_CREATE")?,
        cache_read_per_tok: read("CLAUDE_PRICE_CACHE_READ")?,
    })
}

pub fn pricing_for_model(model_id: &str) -> Option<Pricing> {
    if let Some(p) = env_pricing() {
        return Some(p);
    }
    let m = model_id.to_lowercase().replace('.', "-");
    MODEL_TABLE
        .iter()
        .find(|(needle, _)| m.contains(needle))
        .map(|(_, p)| *p)
}

/// Static price table; unknown models fall back to `fallback` (Sonnet by
/// default) so usage never silently costs nothing.
#[derive(Debug, Clone, Copy)]
pub struct StaticPricing {
    pub fallback: Pricing,
}

impl Default for StaticPricing {
    fn default() -> Self {
        Self { fallback: SONNET }
    }
}

impl CostCalculator for StaticPricing {
    fn compute(&self, model: Option<&str>, usage: &TokenUsage) -> f64 {
        let pricing = model.and_then(pricing_for_model).unwrap_or(self.fallback);
        pricing.cost(usage)
    }
}
