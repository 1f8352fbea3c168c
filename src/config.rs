//! Process-wide configuration, read once at boot from the environment
//! variables named in the control protocol's configuration surface. No
//! ambient global: `main` builds one `AppConfig` and hands clones of the
//! pieces each component needs into that component's constructor, the same
//! way the teacher's `ServerConfig` was built from `env::var` reads in
//! `main` rather than read lazily at call sites scattered through the code.

use std::env;
use std::time::Duration;

use pageforge_engine::EngineConfig;
use pageforge_pipeline::{RouterConfig, ValidatorConfig};
use pageforge_scheduler::SchedulerConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub database_path: String,
    pub admin_token: Option<String>,

    pub worker_concurrency: usize,
    pub chunk_max_retries: i64,
    pub chunk_retry_base_delay: Duration,
    pub chunk_stuck_threshold_secs: i64,
    pub job_soft_timeout: Duration,
    pub normalize_call_timeout: Duration,

    pub validation_min_words: usize,
    pub validation_max_words: usize,
    pub validation_min_pass_rate: f64,

    pub credit_overdraft_floor: i64,
    pub credit_safety_multiplier: f64,
    pub monthly_grant: i64,
    pub pricing_version: String,
}

impl AppConfig {
    /// Reads every knob from the environment, falling back to the spec's
    /// documented defaults. Never panics on a missing or malformed variable
    /// — a bad value is silently replaced by the default rather than
    /// aborting boot, since none of these are security-sensitive.
    pub fn from_env() -> Self {
        Self {
            bind_host: env::var("PAGEFORGE_BIND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            bind_port: env_or("PAGEFORGE_BIND_PORT", 8080),
            database_path: env::var("PAGEFORGE_DATABASE_PATH").unwrap_or_else(|_| "pageforge.db".to_string()),
            admin_token: env::var("PAGEFORGE_ADMIN_TOKEN").ok(),

            worker_concurrency: env_or("WORKER_CONCURRENCY", std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)),
            chunk_max_retries: env_or("CHUNK_MAX_RETRIES", 2),
            chunk_retry_base_delay: Duration::from_secs_f64(env_or("CHUNK_RETRY_BASE_DELAY", 2.0)),
            chunk_stuck_threshold_secs: env_or("CHUNK_STUCK_THRESHOLD", 720),
            job_soft_timeout: Duration::from_secs_f64(env_or("JOB_SOFT_TIMEOUT", 600.0)),
            normalize_call_timeout: Duration::from_secs_f64(env_or("NORMALIZE_CALL_TIMEOUT", 30.0)),

            validation_min_words: env_or("VALIDATION_MIN_WORDS", 4),
            validation_max_words: env_or("VALIDATION_MAX_WORDS", 8),
            validation_min_pass_rate: env_or("VALIDATION_MIN_PASS_RATE", 0.30),

            credit_overdraft_floor: env_or("CREDIT_OVERDRAFT_FLOOR", -100),
            credit_safety_multiplier: env_or("CREDIT_SAFETY_MULTIPLIER", 1.10),
            monthly_grant: env_or("MONTHLY_GRANT", 10_000),
            pricing_version: env::var("PRICING_VERSION").unwrap_or_else(|_| "v1".to_string()),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_max_retries: self.chunk_max_retries,
            chunk_stuck_threshold_secs: self.chunk_stuck_threshold_secs,
            chunk_retry_base_delay: self.chunk_retry_base_delay,
            chunk_call_timeout: self.normalize_call_timeout,
            router_config: RouterConfig::default(),
            validator_config: ValidatorConfig {
                min_words: self.validation_min_words,
                max_words: self.validation_max_words,
                min_pass_rate: self.validation_min_pass_rate,
            },
            ..EngineConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: self.worker_concurrency.max(1),
            soft_timeout: self.job_soft_timeout,
            hard_timeout: self.job_hard_timeout(),
            ..SchedulerConfig::default()
        }
    }

    /// Chunk soft/hard pair derived from `job_soft_timeout`; the hard limit
    /// carries a fixed 60s grace window past the soft one, mirroring the
    /// scheduler's own soft/hard spacing.
    pub fn job_hard_timeout(&self) -> Duration {
        self.job_soft_timeout + Duration::from_secs(60)
    }
}
