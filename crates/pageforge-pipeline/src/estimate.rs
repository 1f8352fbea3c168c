//! Page-count-to-token/credit estimation heuristic used by ControlAPI's
//! `estimate` and `confirm` operations.

/// Base token yield per page; no separate image-density term is applied
/// since no image signal is available before extraction (see the pricing
/// resolution note for this heuristic).
pub const TOKENS_PER_PAGE: i64 = 500;

#[derive(Debug, Clone, Copy)]
pub struct EstimateInput {
    pub page_count: i64,
    pub pricing_rate: f64,
    pub safety_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub estimated_tokens: i64,
    pub estimated_credits: i64,
}

/// `estimated_tokens = page_count * TOKENS_PER_PAGE`;
/// `estimated_credits = ceil(estimated_tokens / 1000 * pricing_rate * safety_multiplier)`.
pub fn estimate(input: EstimateInput) -> Estimate {
    let estimated_tokens = input.page_count * TOKENS_PER_PAGE;
    let raw_credits = (estimated_tokens as f64 / 1000.0) * input.pricing_rate * input.safety_multiplier;
    let estimated_credits = raw_credits.ceil() as i64;
    Estimate { estimated_tokens, estimated_credits }
}
