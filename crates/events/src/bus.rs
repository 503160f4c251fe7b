//! Event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc` between publishers (metadata stores,
//! execution backends, the webhook handler) and the reconcilers.

use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of events.
///
/// Delivery is best effort: a subscriber that falls more than the channel
/// capacity behind observes a lag and loses the oldest events. The
/// dispatch re-scan and the completion poller pick up anything missed this
/// way.
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: T) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receive the next event, skipping over lag.
///
/// Returns `None` once the bus is closed (every [`EventBus`] dropped).
pub async fn next_event<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event bus lagged, some events were skipped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use ccf_core::change::{Change, ChangeRecord};
    use ccf_core::completion::{TerminalEvent, TerminalOutcome};
    use ccf_core::job::Job;
    use chrono::Utc;

    use super::*;
    use crate::{ChangeFeed, CompletionInbox};

    fn job_insert() -> ChangeRecord {
        ChangeRecord::Job(Change::insert(Job::new("cc-abc", Vec::new(), Utc::now())))
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();

        let change = job_insert();
        feed.publish(change.clone());

        let received = next_event(&mut rx).await.expect("should receive the change");
        assert_eq!(received, change);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let inbox = CompletionInbox::default();
        let mut rx1 = inbox.subscribe();
        let mut rx2 = inbox.subscribe();
        assert_eq!(inbox.subscriber_count(), 2);

        inbox.publish(TerminalEvent {
            correlation_id: "ccj-1".into(),
            outcome: TerminalOutcome::Succeeded,
            reason: None,
        });

        assert_eq!(next_event(&mut rx1).await.unwrap().correlation_id, "ccj-1");
        assert_eq!(next_event(&mut rx2).await.unwrap().correlation_id, "ccj-1");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let feed = ChangeFeed::default();
        feed.publish(job_insert());
    }

    #[tokio::test]
    async fn lagged_receiver_skips_to_newest() {
        let feed = ChangeFeed::new(2);
        let mut rx = feed.subscribe();

        for _ in 0..5 {
            feed.publish(job_insert());
        }

        // The two newest events survive the lag.
        assert!(next_event(&mut rx).await.is_some());
        assert!(next_event(&mut rx).await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_bus_ends_stream() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        drop(feed);
        assert!(next_event(&mut rx).await.is_none());
    }
}
