//! Worker consume loop.
//!
//! Pulls deliveries one at a time (prefetch bound + processing lock),
//! dispatches to the processor, and maps the outcome to ACK or
//! NACK-with-requeue. On shutdown the subscription is cancelled first, then
//! the loop waits up to the grace period for the in-flight delivery to
//! finish before closing broker resources; anything still unacked is
//! redelivered by the broker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error_handling::BrokerError;
use crate::messaging::RabbitMqConsumer;
use crate::worker::{ProcessOutcome, Processor};

/// Runs the consume loop until shutdown or a fatal broker failure.
pub struct WorkerRunner {
    consumer: RabbitMqConsumer,
    processor: Arc<Processor>,
    processing_lock: Arc<Mutex<()>>,
    shutdown_grace: Duration,
}

impl WorkerRunner {
    pub fn new(
        consumer: RabbitMqConsumer,
        processor: Arc<Processor>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            consumer,
            processor,
            processing_lock: Arc::new(Mutex::new(())),
            shutdown_grace,
        }
    }

    /// Consumes until the token fires. Returns an error only when the
    /// broker becomes irrecoverable (reconnect schedule exhausted).
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        info!("worker_started");
        let processor = Arc::clone(&self.processor);
        let processing_lock = Arc::clone(&self.processing_lock);

        'outer: loop {
            let deliveries = self.consumer.deliveries()?;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'outer,
                    next = deliveries.next() => match next {
                        Some(Ok(delivery)) => {
                            handle_delivery(&processor, &processing_lock, delivery).await;
                        }
                        Some(Err(e)) => {
                            warn!("delivery stream error: {e}");
                            break;
                        }
                        None => {
                            if shutdown.is_cancelled() {
                                break 'outer;
                            }
                            warn!("delivery stream closed by broker");
                            break;
                        }
                    },
                }
            }
            // Stream broke outside of shutdown: re-establish or die.
            self.consumer.reconnect().await?;
        }

        self.drain().await;
        info!("worker_stop");
        Ok(())
    }

    /// Stops new deliveries, waits for the in-flight one within the grace
    /// period, then closes broker resources.
    async fn drain(&mut self) {
        self.consumer.cancel().await;
        match timeout(self.shutdown_grace, self.processing_lock.lock()).await {
            Ok(_guard) => {}
            Err(_) => warn!(
                "shutdown grace of {:?} elapsed with a delivery still in flight; \
                 the broker will redeliver it",
                self.shutdown_grace
            ),
        }
        self.consumer.close().await;
    }
}

/// Processes one delivery under the lock and applies the ack decision.
async fn handle_delivery(processor: &Processor, lock: &Mutex<()>, delivery: Delivery) {
    let _guard = lock.lock().await;
    match processor.process(&delivery.data).await {
        Ok(ProcessOutcome::RetryableFailure) => nack_requeue(&delivery).await,
        Ok(_) => ack(&delivery).await,
        Err(e) => {
            // Store hiccup mid-processing: requeue and let the redelivery
            // retry once the store is back.
            error!("message handling failed: {e}");
            nack_requeue(&delivery).await;
        }
    }
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        warn!("ack failed (broker will redeliver): {e}");
    }
}

async fn nack_requeue(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: true,
        ..Default::default()
    };
    if let Err(e) = delivery.nack(options).await {
        warn!("nack failed (broker will redeliver): {e}");
    }
}

#[cfg(test)]
mod tests {
    // The ack/nack decision table is covered through Processor outcome tests
    // in tests/processor_flow.rs; exercising handle_delivery directly needs
    // a live broker delivery, which integration environments provide.
}
