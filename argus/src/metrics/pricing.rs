//! Static per-model price table used for cost estimation.
//!
//! Prices are USD per one million tokens. Lookups strip a leading provider
//! routing prefix (`openai/`, `anthropic/`, ...) so `anthropic/claude-3-5-haiku-20241022`
//! and `claude-3-5-haiku-20241022` resolve to the same entry.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Input and output token prices for a model, in USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

const fn price(input: f64, output: f64) -> ModelPrice {
    ModelPrice { input, output }
}

const PROVIDER_PREFIXES: &[&str] = &["openai/", "anthropic/", "google/", "bedrock/", "azure/"];

static MODEL_PRICING: Lazy<HashMap<&'static str, ModelPrice>> = Lazy::new(|| {
    HashMap::from([
        // OpenAI
        ("gpt-4o", price(2.50, 10.00)),
        ("gpt-4o-mini", price(0.15, 0.60)),
        ("gpt-4-turbo", price(10.00, 30.00)),
        ("gpt-4", price(30.00, 60.00)),
        ("gpt-3.5-turbo", price(0.50, 1.50)),
        // Anthropic
        ("claude-opus-4-5-20251101", price(5.00, 25.00)),
        ("claude-opus-4-5", price(5.00, 25.00)),
        ("claude-sonnet-4-5-20250929", price(3.00, 15.00)),
        ("claude-sonnet-4-5", price(3.00, 15.00)),
        ("claude-haiku-4-5-20251001", price(1.00, 5.00)),
        ("claude-haiku-4-5", price(1.00, 5.00)),
        ("claude-opus-4-1-20250805", price(15.00, 75.00)),
        ("claude-opus-4-0", price(15.00, 75.00)),
        ("claude-opus-4-20250514", price(15.00, 75.00)),
        ("claude-sonnet-4-0", price(3.00, 15.00)),
        ("claude-sonnet-4-20250514", price(3.00, 15.00)),
        ("claude-3-7-sonnet-20250219", price(3.00, 15.00)),
        ("claude-3-7-sonnet-latest", price(3.00, 15.00)),
        ("claude-3-5-sonnet-20241022", price(3.00, 15.00)),
        ("claude-3-5-haiku-20241022", price(0.80, 4.00)),
        ("claude-3-5-haiku-latest", price(0.80, 4.00)),
        ("claude-3-opus-20240229", price(15.00, 75.00)),
        ("claude-3-opus-latest", price(15.00, 75.00)),
        ("claude-3-sonnet-20240229", price(3.00, 15.00)),
        ("claude-3-haiku-20240307", price(0.25, 1.25)),
        // Google
        ("gemini-2.0-flash-exp", price(0.00, 0.00)),
        ("gemini-1.5-pro", price(1.25, 5.00)),
        ("gemini-1.5-flash", price(0.075, 0.30)),
        // AWS Bedrock
        ("anthropic.claude-3-5-sonnet-20241022-v2:0", price(3.00, 15.00)),
        ("anthropic.claude-3-5-haiku-20241022-v1:0", price(0.80, 4.00)),
    ])
});

/// Strip a single leading provider routing prefix, if present.
pub fn normalize_model_name(model: &str) -> &str {
    PROVIDER_PREFIXES
        .iter()
        .find_map(|prefix| model.strip_prefix(prefix))
        .unwrap_or(model)
}

/// Look up the price entry for a model.
pub fn lookup(model: &str) -> Option<ModelPrice> {
    MODEL_PRICING.get(normalize_model_name(model)).copied()
}

/// Estimate the USD cost of a completion. Returns `None` for models without a price entry.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    let price = lookup(model)?;
    let input_cost = (input_tokens as f64 / 1_000_000.0) * price.input;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * price.output;
    Some(input_cost + output_cost)
}
