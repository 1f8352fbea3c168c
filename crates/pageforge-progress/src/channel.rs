//! Topic-per-job broadcast. Each job gets its own `broadcast::Sender` so a
//! busy job's subscribers never see another job's events and vice versa;
//! a single global channel filtered client-side (as the teacher does for
//! its transfer events) would work but forces every subscriber to inspect
//! every other job's traffic, which does not scale with job count.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::event::{ProgressEvent, ProgressSnapshot};

/// Supplies the current Job row so a newly-subscribing client can receive
/// an immediate snapshot even if no `publish` has happened since it joined.
/// Implemented by the Store-backed job lookup in the engine crate; kept as
/// a trait here so this crate has no dependency on the persistence layer.
#[async_trait]
pub trait JobSnapshotSource: Send + Sync {
    async fn snapshot(&self, job_id: i64) -> Option<ProgressSnapshot>;
}

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct ProgressChannel {
    topics: RwLock<HashMap<i64, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self { topics: RwLock::new(HashMap::new()) }
    }

    async fn sender_for(&self, job_id: i64) -> broadcast::Sender<ProgressEvent> {
        if let Some(sender) = self.topics.read().await.get(&job_id) {
            return sender.clone();
        }
        let mut topics = self.topics.write().await;
        topics.entry(job_id).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }

    /// Publishes an event to every current subscriber of `job_id`. A
    /// duplicate delivery (e.g. from an at-least-once broker) is harmless
    /// since every event carries a full state snapshot, not a diff.
    pub async fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id();
        let sender = self.sender_for(job_id).await;
        if sender.send(event).is_err() {
            debug!(job_id, "publish with no active subscribers");
        }
    }

    /// Subscribes to `job_id`'s topic. Returns the snapshot event (if the
    /// source has one) immediately followed by a receiver delivering every
    /// subsequent `publish` in order. Dropping the receiver unsubscribes;
    /// a client disconnecting is not treated as an error anywhere in this
    /// crate.
    pub async fn subscribe(
        &self,
        job_id: i64,
        source: &dyn JobSnapshotSource,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let sender = self.sender_for(job_id).await;
        let receiver = sender.subscribe();
        let snapshot = source.snapshot(job_id).await.map(ProgressEvent::Snapshot);
        (snapshot, receiver)
    }

    /// Drops a job's topic once it has no subscribers and will never be
    /// published to again (called by the engine after a job reaches a
    /// terminal state and its final event has been sent).
    pub async fn release(&self, job_id: i64) {
        let mut topics = self.topics.write().await;
        if let Some(sender) = topics.get(&job_id) {
            if sender.receiver_count() == 0 {
                topics.remove(&job_id);
            }
        }
    }
}

pub type SharedProgressChannel = Arc<ProgressChannel>;

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource(Option<ProgressSnapshot>);

    #[async_trait]
    impl JobSnapshotSource for FakeSource {
        async fn snapshot(&self, _job_id: i64) -> Option<ProgressSnapshot> {
            self.0.clone()
        }
    }

    fn snapshot(job_id: i64, percent: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id,
            status: "processing".into(),
            progress_percent: percent,
            current_step: "Normalizing".into(),
            completed_chunks: 1,
            total_chunks: 4,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn subscribe_receives_snapshot_immediately() {
        let channel = ProgressChannel::new();
        let source = FakeSource(Some(snapshot(1, 15.0)));
        let (snap, _rx) = channel.subscribe(1, &source).await;
        assert!(matches!(snap, Some(ProgressEvent::Snapshot(_))));
    }

    #[tokio::test]
    async fn two_subscribers_see_events_in_the_same_order() {
        let channel = ProgressChannel::new();
        let source = FakeSource(None);
        let (_snap1, mut rx1) = channel.subscribe(1, &source).await;
        let (_snap2, mut rx2) = channel.subscribe(1, &source).await;

        channel.publish(ProgressEvent::Progress(snapshot(1, 30.0))).await;
        channel.publish(ProgressEvent::Progress(snapshot(1, 60.0))).await;

        let a1 = rx1.recv().await.unwrap();
        let a2 = rx1.recv().await.unwrap();
        let b1 = rx2.recv().await.unwrap();
        let b2 = rx2.recv().await.unwrap();
        assert_eq!(a1.job_id(), b1.job_id());
        assert!(matches!(a1, ProgressEvent::Progress(s) if s.progress_percent == 30.0));
        assert!(matches!(a2, ProgressEvent::Progress(s) if s.progress_percent == 60.0));
        assert!(matches!(b2, ProgressEvent::Progress(s) if s.progress_percent == 60.0));
    }

    #[tokio::test]
    async fn separate_jobs_do_not_cross_topics() {
        let channel = ProgressChannel::new();
        let source = FakeSource(None);
        let (_snap, mut rx_job1) = channel.subscribe(1, &source).await;
        channel.publish(ProgressEvent::Progress(snapshot(2, 50.0))).await;
        channel.publish(ProgressEvent::Progress(snapshot(1, 20.0))).await;
        let event = rx_job1.recv().await.unwrap();
        assert_eq!(event.job_id(), 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let channel = ProgressChannel::new();
        channel.publish(ProgressEvent::Progress(snapshot(9, 5.0))).await;
    }

    #[tokio::test]
    async fn release_drops_topic_once_unsubscribed() {
        let channel = ProgressChannel::new();
        let source = FakeSource(None);
        {
            let (_snap, _rx) = channel.subscribe(1, &source).await;
        }
        channel.release(1).await;
        assert!(!channel.topics.read().await.contains_key(&1));
    }
}
