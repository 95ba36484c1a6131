//! AMQP consumer attachment.
//!
//! Connects to the same durable queue the publisher declares, with a
//! prefetch window and manual acknowledgement. Ack/nack decisions live in
//! `worker::runner`; this type only manages connection, subscription, and
//! teardown.

use std::sync::Arc;

use lapin::options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use log::{info, warn};
use tokio::time::sleep;

use crate::app::backoff_schedule;
use crate::config::Settings;
use crate::error_handling::BrokerError;
use crate::messaging::declare_metadata_queue;

const CONSUMER_TAG: &str = "metadata_worker";

/// Consumer side of the metadata queue.
pub struct RabbitMqConsumer {
    settings: Arc<Settings>,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
}

impl RabbitMqConsumer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            connection: None,
            channel: None,
            consumer: None,
        }
    }

    /// Initial connect with backoff. Exhaustion is fatal for the worker.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        let mut attempt = 0u32;
        for delay in backoff_schedule(
            self.settings.initial_backoff,
            self.settings.max_backoff,
            self.settings.max_connection_attempts,
        ) {
            attempt += 1;
            info!(
                "rmq_connect_attempt: attempt={attempt} delay_ms={}",
                delay.as_millis()
            );
            match self.attach().await {
                Ok(()) => {
                    info!("rmq_connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!("rmq connect failed: {e}");
                    if attempt >= self.settings.max_connection_attempts {
                        break;
                    }
                    sleep(delay).await;
                }
            }
        }
        Err(BrokerError::ConnectExhausted { attempts: attempt })
    }

    /// Re-establishes connection and subscription after the delivery stream
    /// fails mid-run. Same schedule as connect; exhaustion is fatal.
    pub async fn reconnect(&mut self) -> Result<(), BrokerError> {
        self.consumer = None;
        self.channel = None;
        self.connection = None;

        let mut attempt = 0u32;
        for delay in backoff_schedule(
            self.settings.initial_backoff,
            self.settings.max_backoff,
            self.settings.max_connection_attempts,
        ) {
            attempt += 1;
            info!("rmq_reconnect_attempt: attempt={attempt}");
            match self.attach().await {
                Ok(()) => {
                    info!("rmq_reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!("reconnect failed: {e}");
                    sleep(delay).await;
                }
            }
        }
        warn!(
            "rmq_reconnect_exhausted: max_attempts={}",
            self.settings.max_connection_attempts
        );
        Err(BrokerError::ConnectExhausted { attempts: attempt })
    }

    /// One attachment attempt: connection, channel, qos, queue, subscription.
    async fn attach(&mut self) -> Result<(), lapin::Error> {
        let connection =
            Connection::connect(&self.settings.broker_url, ConnectionProperties::default())
                .await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.settings.prefetch_count, BasicQosOptions::default())
            .await?;
        declare_metadata_queue(&channel, &self.settings).await?;
        let consumer = channel
            .basic_consume(
                &self.settings.queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.connection = Some(connection);
        self.channel = Some(channel);
        self.consumer = Some(consumer);
        Ok(())
    }

    /// The delivery stream. Errors when the consumer is not attached.
    pub fn deliveries(&mut self) -> Result<&mut Consumer, BrokerError> {
        self.consumer.as_mut().ok_or(BrokerError::NotConnected)
    }

    /// Cancels the subscription so no new deliveries arrive. Unacked
    /// deliveries stay owned by this channel until it closes.
    pub async fn cancel(&mut self) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel
                .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
                .await
            {
                warn!("consumer cancel failed: {e}");
            }
        }
        self.consumer = None;
    }

    /// Closes channel and connection. Any still-unacked delivery is
    /// redelivered by the broker.
    pub async fn close(&mut self) {
        self.consumer = None;
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close(200, "shutting down").await {
                warn!("channel close failed (continuing to close connection): {e}");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "shutting down").await {
                warn!("connection close failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deliveries_requires_attachment() {
        let settings = Arc::new(Settings::default());
        let mut consumer = RabbitMqConsumer::new(settings);
        assert!(matches!(
            consumer.deliveries(),
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_exhaustion_reports_attempts() {
        let settings = Arc::new(Settings {
            broker_url: "amqp://127.0.0.1:1/%2f".to_string(),
            max_connection_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..Settings::default()
        });
        let mut consumer = RabbitMqConsumer::new(settings);
        let result = consumer.connect().await;
        assert!(matches!(
            result,
            Err(BrokerError::ConnectExhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let settings = Arc::new(Settings::default());
        let mut consumer = RabbitMqConsumer::new(settings);
        consumer.close().await;
        consumer.cancel().await;
    }
}
