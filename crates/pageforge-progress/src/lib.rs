//! Per-job progress pub/sub: topic-per-job broadcast with a snapshot sent
//! immediately on subscribe, so a late-joining client sees current state
//! without waiting for the next `publish`.

pub mod channel;
pub mod event;

pub use channel::{JobSnapshotSource, ProgressChannel, SharedProgressChannel};
pub use event::{ProgressEvent, ProgressSnapshot};
