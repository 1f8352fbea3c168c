//! HTTP surface: thin handlers that validate, delegate to the engine/ledger,
//! and shape a response. No business logic lives here — every decision a
//! handler makes beyond request parsing is a one-line delegation to a
//! lower crate, matching the teacher's `orbit-web::api` handlers.

pub mod admin;
pub mod estimate;
pub mod jobs;
pub mod progress_ws;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/estimate", post(estimate::estimate))
        .route("/jobs", post(jobs::confirm))
        .route("/jobs/:id", get(jobs::status))
        .route("/jobs/:id/cancel", post(jobs::cancel))
        .route("/jobs/:id/ws", get(progress_ws::subscribe))
        .route("/admin/jobs/:id/force-finalize", post(admin::force_finalize))
        .with_state(state)
}
