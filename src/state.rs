//! Shared state handed to every axum handler: the engine (which itself
//! owns the store/ledger/scheduler/progress handles), plus the bits the
//! API layer needs directly and doesn't go through the engine for.

use std::sync::Arc;

use pageforge_engine::JobEngine;
use pageforge_progress::ProgressChannel;
use pageforge_store::{CreditLedger, Store};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: JobEngine,
    pub store: Arc<dyn Store>,
    pub ledger: Arc<CreditLedger>,
    pub progress: Arc<ProgressChannel>,
    pub config: Arc<AppConfig>,
}
