//! Confirm-mode AMQP publisher.
//!
//! A state machine over a single channel to the durable metadata queue.
//! Lifecycle: CONNECTING -> CONNECTED -> CHANNEL_OPEN -> CONFIRM_ENABLED ->
//! QUEUE_DECLARED -> READY. On broker disconnect or a failed publish:
//! RECONNECTING -> backoff -> READY. On close(): CLOSING -> drain in-flight
//! publish -> CLOSED.
//!
//! Concurrency: the channel is only touched while holding the publish lock,
//! so at most one publish is in flight and a reconnect can never tear down
//! a channel under an active publish. The reconnect task acquires the same
//! lock before swapping the connection in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::app::backoff_schedule;
use crate::config::Settings;
use crate::error_handling::{BrokerError, PublishError};
use crate::messaging::publisher::StateCell;
use crate::messaging::{declare_metadata_queue, Envelope, MessagePublisher, PublisherState};

/// AMQP delivery mode 2: message survives a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

struct BrokerHandle {
    connection: Connection,
    channel: Channel,
}

struct Inner {
    settings: Arc<Settings>,
    state: StateCell,
    /// The publish lock. Guards the channel: held for the full
    /// publish-and-confirm round trip and during connection swaps.
    handle: Mutex<Option<BrokerHandle>>,
    closing: AtomicBool,
    reconnecting: AtomicBool,
}

/// Confirm-mode publisher over a durable queue. Cheap to clone via `Arc` in
/// the API state; all methods take `&self`.
pub struct RabbitMqPublisher {
    inner: Arc<Inner>,
}

impl RabbitMqPublisher {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                state: StateCell::new(PublisherState::Disconnected),
                handle: Mutex::new(None),
                closing: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    /// One full connection attempt: connect, open channel, enable confirms,
    /// declare the queue, install the disconnect callback, swap the handle
    /// in under the publish lock, and go READY.
    async fn establish(inner: &Arc<Inner>) -> Result<(), BrokerError> {
        let settings = &inner.settings;
        let connection =
            Connection::connect(&settings.broker_url, ConnectionProperties::default()).await?;
        inner.state.set(PublisherState::Connected);
        info!("rmq_connected");

        inner.state.set(PublisherState::ChannelOpen);
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(lapin::options::ConfirmSelectOptions::default())
            .await?;
        inner.state.set(PublisherState::ConfirmEnabled);

        declare_metadata_queue(&channel, settings).await?;
        inner.state.set(PublisherState::QueueDeclared);

        let weak = Arc::downgrade(inner);
        let runtime = tokio::runtime::Handle::current();
        connection.on_error(move |err| {
            if let Some(inner) = weak.upgrade() {
                warn!("broker_disconnect_detected: {err}");
                runtime.spawn(RabbitMqPublisher::trigger_reconnect(inner));
            }
        });

        let mut guard = inner.handle.lock().await;
        *guard = Some(BrokerHandle {
            connection,
            channel,
        });
        drop(guard);

        inner.state.set(PublisherState::Ready);
        Ok(())
    }

    /// Moves to RECONNECTING and runs the reconnect loop, unless one is
    /// already running or close() has begun.
    ///
    /// Returns a boxed future (rather than `async fn`) so that its opaque
    /// return type doesn't inline the mutually-recursive call chain through
    /// `reconnect_loop` -> `establish` -> (on_error closure) -> here, which
    /// otherwise defeats the Send auto-trait check on `establish`'s future.
    fn trigger_reconnect(
        inner: Arc<Inner>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            if inner.closing.load(Ordering::SeqCst) {
                return;
            }
            if inner.reconnecting.swap(true, Ordering::SeqCst) {
                return;
            }
            inner.state.set(PublisherState::Reconnecting);
            Self::reconnect_loop(&inner).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        })
    }

    /// Backoff loop re-running the connect sequence. Never terminates the
    /// process: after exhausting the schedule the publisher parks in
    /// DISCONNECTED and the API keeps answering 503 until the next trigger.
    async fn reconnect_loop(inner: &Arc<Inner>) {
        let settings = &inner.settings;
        let mut attempt = 0u32;
        for delay in backoff_schedule(
            settings.initial_backoff,
            settings.max_backoff,
            settings.max_connection_attempts,
        ) {
            if inner.closing.load(Ordering::SeqCst) {
                return;
            }
            attempt += 1;
            info!("rmq_reconnect_attempt: attempt={attempt}");
            match Self::establish(inner).await {
                Ok(()) => {
                    info!("rmq_reconnected");
                    return;
                }
                Err(e) => {
                    warn!("reconnect failed: {e}");
                    sleep(delay).await;
                }
            }
        }
        warn!(
            "rmq_reconnect_exhausted: max_attempts={}",
            settings.max_connection_attempts
        );
        inner.state.set(PublisherState::Disconnected);
    }

    fn begin_reconnect(&self) {
        self.inner.state.set(PublisherState::Reconnecting);
        tokio::spawn(Self::trigger_reconnect(Arc::clone(&self.inner)));
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqPublisher {
    async fn connect(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        let settings = &inner.settings;
        inner.state.set(PublisherState::Connecting);

        let mut attempt = 0u32;
        for delay in backoff_schedule(
            settings.initial_backoff,
            settings.max_backoff,
            settings.max_connection_attempts,
        ) {
            attempt += 1;
            info!("rmq_connect_attempt: attempt={attempt} delay_ms={}", delay.as_millis());
            match Self::establish(inner).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("rmq connect failed: {e}");
                    if attempt >= settings.max_connection_attempts {
                        break;
                    }
                    sleep(delay).await;
                }
            }
        }
        error!("rmq_connect_failed: attempt={attempt}");
        inner.state.set(PublisherState::Disconnected);
        Err(BrokerError::ConnectExhausted { attempts: attempt })
    }

    fn state(&self) -> PublisherState {
        self.inner.state.get()
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let inner = &self.inner;
        let settings = &inner.settings;

        if self.state() != PublisherState::Ready {
            warn!(
                "publish_rejected: reason=publisher_not_ready url={}",
                envelope.url
            );
            return Err(PublishError::NotReady);
        }

        let body = serde_json::to_vec(envelope).expect("envelope serializes to JSON");
        let started = Instant::now();

        let guard = inner.handle.lock().await;
        let handle = match guard.as_ref() {
            Some(handle) => handle,
            None => {
                drop(guard);
                warn!("publish_failed: reason=connection_lost url={}", envelope.url);
                self.begin_reconnect();
                return Err(PublishError::ConnectionLost);
            }
        };

        let confirm = timeout(settings.publish_confirm_timeout, async {
            handle
                .channel
                .basic_publish(
                    "",
                    &settings.queue_name,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
                )
                .await?
                .await
        })
        .await;
        drop(guard);

        match confirm {
            Err(_elapsed) => {
                warn!(
                    "publish_failed: reason=confirm_timeout request_id={} url={}",
                    envelope.request_id, envelope.url
                );
                Err(PublishError::ConfirmTimeout(
                    settings.publish_confirm_timeout,
                ))
            }
            Ok(Err(e)) => {
                warn!(
                    "publish_failed: reason=connection_lost request_id={} url={} error={e}",
                    envelope.request_id, envelope.url
                );
                self.begin_reconnect();
                Err(PublishError::ConnectionLost)
            }
            Ok(Ok(Confirmation::Nack(_))) => {
                warn!(
                    "publish_rejected: reason=queue_rejected request_id={} url={}",
                    envelope.request_id, envelope.url
                );
                Err(PublishError::QueueRejected)
            }
            Ok(Ok(_ack)) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(
                    "publish_success: request_id={} url={} latency_ms={latency_ms:.2}",
                    envelope.request_id, envelope.url
                );
                Ok(())
            }
        }
    }

    async fn close(&self) {
        let inner = &self.inner;
        inner.closing.store(true, Ordering::SeqCst);
        inner.state.set(PublisherState::Closing);
        info!("publisher_shutdown");

        // Acquiring the publish lock drains any in-flight publish first.
        let mut guard = inner.handle.lock().await;
        if let Some(handle) = guard.take() {
            if let Err(e) = handle.channel.close(200, "shutting down").await {
                warn!("channel close failed (continuing to close connection): {e}");
            }
            if let Err(e) = handle.connection.close(200, "shutting down").await {
                warn!("connection close failed: {e}");
            }
        }
        drop(guard);
        inner.state.set(PublisherState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Arc<Settings> {
        Arc::new(Settings {
            broker_url: "amqp://127.0.0.1:1/%2f".to_string(),
            max_connection_attempts: 1,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(2),
            ..Settings::default()
        })
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_not_ready() {
        let publisher = RabbitMqPublisher::new(test_settings());
        assert_eq!(publisher.state(), PublisherState::Disconnected);
        assert!(!publisher.ready());

        let url = crate::app::NormalizedUrl::parse("https://example.com").unwrap();
        let envelope = Envelope::new(&url);
        let result = publisher.publish(&envelope).await;
        assert!(matches!(result, Err(PublishError::NotReady)));
    }

    #[tokio::test]
    async fn test_connect_exhaustion_is_fatal_and_disconnected() {
        // Port 1 refuses immediately, so the single attempt fails fast.
        let publisher = RabbitMqPublisher::new(test_settings());
        let result = publisher.connect().await;
        assert!(matches!(
            result,
            Err(BrokerError::ConnectExhausted { attempts: 1 })
        ));
        assert_eq!(publisher.state(), PublisherState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_reaches_closed_without_connection() {
        let publisher = RabbitMqPublisher::new(test_settings());
        publisher.close().await;
        assert_eq!(publisher.state(), PublisherState::Closed);
    }
}


