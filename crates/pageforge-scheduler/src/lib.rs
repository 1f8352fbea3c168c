//! Bounded worker pool executing queued tasks (`process_chunk`, finalization,
//! watchdog repair actions) off the request/reactor path, with soft/hard
//! time limits and memory-bounded worker recycling.

pub mod compute;
pub mod error;
pub mod pool;

pub use compute::offload_compute;
pub use error::SchedulerError;
pub use pool::{Scheduler, SchedulerConfig, Task, TaskFuture};
