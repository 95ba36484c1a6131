//! Publisher port, lifecycle states, and the message envelope.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::NormalizedUrl;
use crate::error_handling::{BrokerError, PublishError};

/// Publisher lifecycle states.
///
/// ```text
/// DISCONNECTED -> CONNECTING -> CONNECTED -> CHANNEL_OPEN ->
///   CONFIRM_ENABLED -> QUEUE_DECLARED -> READY
/// READY --(connection loss)--> RECONNECTING -> CONNECTING -> ...
/// any --(close())--> CLOSING -> CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PublisherState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    ChannelOpen = 3,
    ConfirmEnabled = 4,
    QueueDeclared = 5,
    Ready = 6,
    Reconnecting = 7,
    Closing = 8,
    Closed = 9,
}

impl PublisherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherState::Disconnected => "DISCONNECTED",
            PublisherState::Connecting => "CONNECTING",
            PublisherState::Connected => "CONNECTED",
            PublisherState::ChannelOpen => "CHANNEL_OPEN",
            PublisherState::ConfirmEnabled => "CONFIRM_ENABLED",
            PublisherState::QueueDeclared => "QUEUE_DECLARED",
            PublisherState::Ready => "READY",
            PublisherState::Reconnecting => "RECONNECTING",
            PublisherState::Closing => "CLOSING",
            PublisherState::Closed => "CLOSED",
        }
    }

    fn from_u8(raw: u8) -> PublisherState {
        match raw {
            1 => PublisherState::Connecting,
            2 => PublisherState::Connected,
            3 => PublisherState::ChannelOpen,
            4 => PublisherState::ConfirmEnabled,
            5 => PublisherState::QueueDeclared,
            6 => PublisherState::Ready,
            7 => PublisherState::Reconnecting,
            8 => PublisherState::Closing,
            9 => PublisherState::Closed,
            _ => PublisherState::Disconnected,
        }
    }
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free state cell shared between the publisher and its reconnect task.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: PublisherState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> PublisherState {
        PublisherState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: PublisherState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Message envelope published to the queue.
///
/// Opaque to the broker; the worker only requires `url` and `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub url: String,
    pub request_id: String,
    pub requested_at: DateTime<Utc>,
}

impl Envelope {
    /// Builds an envelope for a validated URL with a fresh request id.
    pub fn new(url: &NormalizedUrl) -> Self {
        Self {
            url: url.as_str().to_string(),
            request_id: Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
        }
    }
}

/// Port for enqueueing metadata fetch requests.
///
/// The production implementation is `RabbitMqPublisher`; tests and
/// broker-less local runs use `InMemoryPublisher`.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Establishes the broker connection. Fatal at startup when it fails.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Current lifecycle state.
    fn state(&self) -> PublisherState;

    /// True when publishes are accepted.
    fn ready(&self) -> bool {
        self.state() == PublisherState::Ready
    }

    /// Publishes one envelope and waits for the broker confirm.
    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError>;

    /// Drains any in-flight publish, then closes channel and connection.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            PublisherState::Disconnected,
            PublisherState::Connecting,
            PublisherState::Connected,
            PublisherState::ChannelOpen,
            PublisherState::ConfirmEnabled,
            PublisherState::QueueDeclared,
            PublisherState::Ready,
            PublisherState::Reconnecting,
            PublisherState::Closing,
            PublisherState::Closed,
        ] {
            assert_eq!(PublisherState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new(PublisherState::Disconnected);
        assert_eq!(cell.get(), PublisherState::Disconnected);
        cell.set(PublisherState::Ready);
        assert_eq!(cell.get(), PublisherState::Ready);
    }

    #[test]
    fn test_envelope_serializes_with_request_id() {
        let url = NormalizedUrl::parse("https://example.com").unwrap();
        let envelope = Envelope::new(&url);
        assert_eq!(envelope.url, "https://example.com/");
        assert!(!envelope.request_id.is_empty());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["url"], "https://example.com/");
        assert!(json["requested_at"].is_string());
    }

    #[test]
    fn test_envelope_request_ids_are_unique() {
        let url = NormalizedUrl::parse("https://example.com").unwrap();
        let a = Envelope::new(&url);
        let b = Envelope::new(&url);
        assert_ne!(a.request_id, b.request_id);
    }
}
