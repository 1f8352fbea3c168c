//! `POST /jobs` (confirm), `GET /jobs/{id}` (status), `POST /jobs/{id}/cancel`.
//! Multipart upload carries the PDF bytes plus a `settings` JSON part;
//! PDF byte extraction itself is out of scope, so confirm only validates
//! the upload's magic bytes and trusts the caller-supplied `page_count` the
//! way it would trust a pre-computed page index from an upstream ingest
//! step in a deployment that wires in a real `TextExtractor`.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use pageforge_engine::StartJobParams;
use pageforge_store::Job;

use crate::api::estimate::pricing_rate_for_model;
use crate::error::ApiError;
use crate::state::AppState;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Deserialize)]
pub struct ConfirmSettings {
    pub page_count: i64,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub job_id: i64,
    pub estimated_credits: i64,
}

pub async fn confirm(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<ConfirmResponse>, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut settings: Option<ConfirmSettings> = None;
    let mut user_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| ApiError::InvalidSettings(err.to_string()))? {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().unwrap_or("upload.pdf").to_string();
                let data = field.bytes().await.map_err(|err| ApiError::InvalidPdf(err.to_string()))?;
                file_bytes = Some(data.to_vec());
            }
            "settings" => {
                let data = field.bytes().await.map_err(|err| ApiError::InvalidSettings(err.to_string()))?;
                settings = Some(serde_json::from_slice(&data).map_err(|err| ApiError::InvalidSettings(err.to_string()))?);
            }
            "user_id" => {
                let data = field.bytes().await.map_err(|err| ApiError::InvalidSettings(err.to_string()))?;
                user_id = Some(String::from_utf8_lossy(&data).to_string());
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| ApiError::InvalidPdf("missing file part".to_string()))?;
    let settings = settings.ok_or_else(|| ApiError::InvalidSettings("missing settings part".to_string()))?;
    let user_id = user_id.ok_or_else(|| ApiError::InvalidSettings("missing user_id part".to_string()))?;

    if !file_bytes.starts_with(PDF_MAGIC) {
        return Err(ApiError::InvalidPdf("file does not begin with the PDF magic header".to_string()));
    }
    if settings.page_count <= 0 {
        return Err(ApiError::InvalidPdf("page_count must be positive".to_string()));
    }

    let pricing_rate = pricing_rate_for_model(&settings.model)?;
    let source_ref = blake3::hash(&file_bytes).to_hex().to_string();

    let now = chrono::Utc::now();
    let month_key = now.format("%Y-%m").to_string();
    state
        .ledger
        .ensure_monthly_grant(&user_id, &month_key, state.config.monthly_grant, &state.config.pricing_version, now.timestamp())
        .await
        .map_err(ApiError::Store)?;

    let projection = pageforge_pipeline::estimate::estimate(pageforge_pipeline::EstimateInput {
        page_count: settings.page_count,
        pricing_rate,
        safety_multiplier: state.config.credit_safety_multiplier,
    });

    let job = state
        .engine
        .start(StartJobParams {
            user_id,
            model: settings.model,
            pricing_version: state.config.pricing_version.clone(),
            pricing_rate,
            estimated_tokens: projection.estimated_tokens,
            estimated_credits: projection.estimated_credits,
            filename,
            source_ref,
            page_count: settings.page_count,
            reserved_credits: projection.estimated_credits,
        })
        .await?;

    Ok(Json(ConfirmResponse { job_id: job.id, estimated_credits: projection.estimated_credits }))
}

pub async fn status(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Job>, ApiError> {
    state.store.get_job(id).await.map_err(ApiError::Store)?.ok_or_else(|| ApiError::NotFound(format!("job {id}"))).map(Json)
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub status: String,
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<StatusChangeResponse>, ApiError> {
    state.engine.cancel(id).await?;
    Ok(Json(StatusChangeResponse { status: "cancelled".to_string() }))
}
