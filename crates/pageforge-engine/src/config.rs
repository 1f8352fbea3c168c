use std::time::Duration;

use pageforge_pipeline::{RouterConfig, ValidatorConfig};

/// Knobs for chunk retry/backoff, stuck-chunk detection, and watchdog cadence.
/// Pipeline-stage knobs (router/validator thresholds) are embedded rather than
/// re-declared, mirroring `SchedulerConfig`'s one-struct-per-component shape.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max retries per chunk, passed straight through to `Store::plan_chunks`.
    pub chunk_max_retries: i64,
    /// A `running` chunk whose heartbeat is older than this is stuck.
    pub chunk_stuck_threshold_secs: i64,
    /// Base delay before the first retry; doubles per attempt.
    pub chunk_retry_base_delay: Duration,
    /// Wall-clock budget for a single normalizer call within a chunk.
    pub chunk_call_timeout: Duration,
    pub router_config: RouterConfig,
    pub validator_config: ValidatorConfig,
    pub watchdog_interval: Duration,
    pub watchdog_max_concurrent_repairs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_max_retries: 2,
            chunk_stuck_threshold_secs: 120,
            chunk_retry_base_delay: Duration::from_secs(2),
            chunk_call_timeout: Duration::from_secs(30),
            router_config: RouterConfig::default(),
            validator_config: ValidatorConfig::default(),
            watchdog_interval: Duration::from_secs(30),
            watchdog_max_concurrent_repairs: 8,
        }
    }
}
