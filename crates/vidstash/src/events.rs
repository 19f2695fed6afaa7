//! Change notifications for the download store.
//!
//! Every subscriber owns a single-slot mailbox: publishing while a previous
//! notification is still unread overwrites it instead of queueing, and a fresh
//! subscriber starts with one pending notification so it can do its initial
//! listing through the same loop it uses for updates.

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Publishing side of the feed. Payload-free: consumers re-list on every notification.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: watch::Sender<u64>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Signal that something changed. Never blocks and never fails, with or
    /// without subscribers.
    pub fn publish(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn subscribe(&self) -> ChangeSubscriber {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        ChangeSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[derive(Debug)]
pub struct ChangeSubscriber {
    rx: watch::Receiver<u64>,
}

impl ChangeSubscriber {
    /// Wait for the next notification, consuming it.
    ///
    /// Returns `false` once the feed is gone and nothing is pending.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether a notification is waiting, without consuming it.
    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn into_stream(self) -> impl Stream<Item = ()> + Send + Unpin {
        WatchStream::from_changes(self.rx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn new_subscriber_is_notified_immediately() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe();
        assert!(sub.has_pending());
        assert!(sub.changed().await);
        assert!(!sub.has_pending());
    }

    #[tokio::test]
    async fn bursts_coalesce_into_one_notification() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe();
        assert!(sub.changed().await);

        for _ in 0..5 {
            feed.publish();
        }

        assert!(sub.changed().await);
        assert!(!sub.has_pending());
        let next = tokio::time::timeout(Duration::from_millis(50), sub.changed()).await;
        assert!(next.is_err(), "no second notification expected");
    }

    #[tokio::test]
    async fn every_subscriber_gets_its_own_mailbox() {
        let feed = ChangeFeed::new();
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        assert!(first.changed().await);
        feed.publish();

        assert!(first.changed().await);
        // second never consumed its initial notification; the publish merged into it
        assert!(second.changed().await);
        assert!(!second.has_pending());
    }

    #[tokio::test]
    async fn stream_yields_initial_and_later_changes() {
        let feed = ChangeFeed::new();
        let mut stream = feed.subscribe().into_stream();

        assert_eq!(stream.next().await, Some(()));
        feed.publish();
        feed.publish();
        assert_eq!(stream.next().await, Some(()));

        drop(feed);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn closed_feed_ends_subscription() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe();
        assert!(sub.changed().await);
        drop(feed);
        assert!(!sub.changed().await);
    }
}
