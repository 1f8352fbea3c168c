//! `POST /estimate`: stateless page-count-to-credit projection. No Job or
//! reservation is created here; `confirm` recomputes the same numbers
//! against the Job's pricing snapshot rather than trusting a client-echoed
//! estimate, so a stale or tampered estimate response can never under-charge.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use pageforge_pipeline::estimate::{estimate as compute_estimate, EstimateInput};

use crate::error::ApiError;
use crate::state::AppState;

/// Per-model pricing multiplier applied on top of the page-count heuristic.
/// `balanced` is the reference tier (rate 1.0, matching the confirmed
/// seed scenario); `light`/`heavy` trade completeness for cost the way the
/// PromptRouter's own tiering does for a single document's sentences.
pub fn pricing_rate_for_model(model: &str) -> Result<f64, ApiError> {
    match model {
        "light" => Ok(0.6),
        "balanced" => Ok(1.0),
        "heavy" => Ok(1.8),
        other => Err(ApiError::InvalidSettings(format!("unknown model '{other}'"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub page_count: i64,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub estimated_tokens: i64,
    pub estimated_credits: i64,
    pub pricing_rate: f64,
    pub model: String,
}

pub async fn estimate(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    if request.page_count <= 0 {
        return Err(ApiError::InvalidPdf("page_count must be positive".to_string()));
    }
    let pricing_rate = pricing_rate_for_model(&request.model)?;
    let result = compute_estimate(EstimateInput {
        page_count: request.page_count,
        pricing_rate,
        safety_multiplier: state.config.credit_safety_multiplier,
    });
    Ok(Json(EstimateResponse {
        estimated_tokens: result.estimated_tokens,
        estimated_credits: result.estimated_credits,
        pricing_rate,
        model: request.model,
    }))
}
