//! Wires the Store, Pipeline, Scheduler, and Progress crates into the
//! JobEngine: the component that owns a Job's lifecycle from `start` through
//! chunk fan-out/fan-in to `finalize`, plus the watchdogs that reconcile
//! state a crashed worker left behind.

pub mod config;
pub mod engine;
pub mod error;
pub mod watchdog;

pub use config::EngineConfig;
pub use engine::{JobEngine, StartJobParams, StoreSnapshotSource};
pub use error::{EngineError, EngineResult};
