//! Provider-side subscription bookkeeping.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::SharedDataError;

/// Values of one subscribed key. Ends when the provider closes the key.
#[derive(Debug)]
pub struct KeyStream {
    key: String,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl KeyStream {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn next_value(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for KeyStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

type Subscription = (String, String);

/// Fans published values out to subscribers, one stream per consumer and key.
///
/// A consumer may hold at most one open stream per key. Once the consumer
/// drops its stream, or the key is closed, it may subscribe again.
#[derive(Debug, Default)]
pub struct KeyPublisher {
    subscribers: Mutex<HashMap<Subscription, mpsc::UnboundedSender<Bytes>>>,
}

impl KeyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, consumer: &str, key: &str) -> Result<KeyStream, SharedDataError> {
        let mut subscribers = self.subscribers.lock();
        let id = (consumer.to_owned(), key.to_owned());
        if subscribers.get(&id).is_some_and(|tx| !tx.is_closed()) {
            return Err(SharedDataError::AlreadySubscribed {
                consumer: id.0,
                key: id.1,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.insert(id, tx);
        debug!(%consumer, %key, "key subscribed");
        Ok(KeyStream {
            key: key.to_owned(),
            rx,
        })
    }

    pub fn is_subscribed(&self, consumer: &str, key: &str) -> bool {
        self.subscribers
            .lock()
            .get(&(consumer.to_owned(), key.to_owned()))
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Send `value` to every open subscription of `key`. Returns the number
    /// of subscribers reached.
    pub fn publish(&self, key: &str, value: Bytes) -> usize {
        let mut reached = 0;
        self.subscribers.lock().retain(|(_, k), tx| {
            if k != key {
                return !tx.is_closed();
            }
            let open = tx.send(value.clone()).is_ok();
            reached += usize::from(open);
            open
        });
        trace!(%key, reached, "value published");
        reached
    }

    /// End the stream of one consumer.
    pub fn close(&self, consumer: &str, key: &str) {
        self.subscribers
            .lock()
            .remove(&(consumer.to_owned(), key.to_owned()));
    }

    /// End every stream of `key`.
    pub fn close_key(&self, key: &str) {
        self.subscribers.lock().retain(|(_, k), _| k != key);
    }

    pub fn close_all(&self) {
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_single_open_stream_per_consumer_and_key() {
        let publisher = KeyPublisher::new();
        let mut a = publisher.subscribe("dns", "leases").unwrap();
        assert_matches!(
            publisher.subscribe("dns", "leases"),
            Err(SharedDataError::AlreadySubscribed { .. })
        );
        // other consumer, same key
        let mut b = publisher.subscribe("ntp", "leases").unwrap();

        assert_eq!(publisher.publish("leases", Bytes::from_static(b"1")), 2);
        assert_eq!(a.next_value().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(b.next_value().await.unwrap(), Bytes::from_static(b"1"));

        drop(a);
        assert!(!publisher.is_subscribed("dns", "leases"));
        assert_eq!(publisher.publish("leases", Bytes::from_static(b"2")), 1);
        publisher.subscribe("dns", "leases").unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let publisher = KeyPublisher::new();
        let mut a = publisher.subscribe("dns", "leases").unwrap();
        let mut b = publisher.subscribe("dns", "routes").unwrap();

        publisher.close_key("leases");
        assert!(a.next_value().await.is_none());
        assert!(publisher.is_subscribed("dns", "routes"));

        publisher.close_all();
        assert!(b.next_value().await.is_none());
        assert_eq!(publisher.publish("routes", Bytes::new()), 0);
    }
}
