//! Tracing setup: `RUST_LOG`-driven `EnvFilter`, plain text by default and
//! structured JSON when `PAGEFORGE_LOG_FORMAT=json` is set (container/
//! log-aggregator deployments). No `println!` banners at startup — boot
//! progress is reported through the same `tracing::info!` calls as every
//! other event, at `info` level so it's visible with the default filter.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PAGEFORGE_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        fmt().with_env_filter(filter).json().with_current_span(true).with_span_list(true).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
