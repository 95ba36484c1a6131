//! In-memory publisher for tests and broker-less local runs.

use std::sync::Mutex;

use async_trait::async_trait;
use log::warn;

use crate::error_handling::{BrokerError, PublishError};
use crate::messaging::{Envelope, MessagePublisher, PublisherState};

/// A publisher that appends envelopes to a bounded buffer.
///
/// Always READY. The capacity bound mirrors the broker's `x-max-length` +
/// `reject-publish` behavior so overflow paths can be tested without a
/// broker. No consumer drains this buffer.
pub struct InMemoryPublisher {
    buffer: Mutex<Vec<Envelope>>,
    capacity: usize,
}

impl InMemoryPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Snapshot of everything published so far.
    pub fn published(&self) -> Vec<Envelope> {
        self.lock_buffer().clone()
    }

    /// Number of buffered envelopes.
    pub fn len(&self) -> usize {
        self.lock_buffer().len()
    }

    /// True when nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<Envelope>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn state(&self) -> PublisherState {
        PublisherState::Ready
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let mut buffer = self.lock_buffer();
        if buffer.len() >= self.capacity {
            warn!(
                "publish_rejected: reason=queue_rejected request_id={} url={}",
                envelope.request_id, envelope.url
            );
            return Err(PublishError::QueueRejected);
        }
        buffer.push(envelope.clone());
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::NormalizedUrl;

    fn envelope(url: &str) -> Envelope {
        Envelope::new(&NormalizedUrl::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_always_ready() {
        let publisher = InMemoryPublisher::new(10);
        assert!(publisher.ready());
        assert_eq!(publisher.state(), PublisherState::Ready);
    }

    #[tokio::test]
    async fn test_publish_buffers_envelopes() {
        let publisher = InMemoryPublisher::new(10);
        publisher.publish(&envelope("https://a.example.com")).await.unwrap();
        publisher.publish(&envelope("https://b.example.com")).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].url, "https://a.example.com/");
        assert_eq!(published[1].url, "https://b.example.com/");
    }

    #[tokio::test]
    async fn test_overflow_rejects_like_the_broker() {
        let publisher = InMemoryPublisher::new(1);
        publisher.publish(&envelope("https://a.example.com")).await.unwrap();
        let result = publisher.publish(&envelope("https://b.example.com")).await;
        assert!(matches!(result, Err(PublishError::QueueRejected)));
        assert_eq!(publisher.len(), 1);
    }
}
