//! `POST /admin/jobs/{id}/force-finalize`: privileged escape hatch that
//! re-runs the unfinalized-job watchdog for one job immediately, for an
//! operator who doesn't want to wait for the next tick.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::auth::check_admin_token;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub status: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

pub async fn force_finalize(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<StatusChangeResponse>, ApiError> {
    check_admin_token(&state.config.admin_token, bearer_token(&headers))?;
    state.engine.force_finalize(id).await?;
    let job = state.store.get_job(id).await.map_err(ApiError::Store)?.ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    Ok(Json(StatusChangeResponse { status: job.status.to_string() }))
}
