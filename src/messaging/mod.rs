//! Broker messaging: publisher state machine, consumer attachment, and the
//! in-memory publisher used for broker-less testing.

mod inmemory;
mod publisher;
mod rabbitmq_consumer;
mod rabbitmq_publisher;

pub use inmemory::InMemoryPublisher;
pub use publisher::{Envelope, MessagePublisher, PublisherState};
pub use rabbitmq_consumer::RabbitMqConsumer;
pub use rabbitmq_publisher::RabbitMqPublisher;

use lapin::options::QueueDeclareOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::Channel;

use crate::config::Settings;

/// Declares the shared metadata queue.
///
/// The declaration must be byte-identical on producer and consumer or the
/// broker rejects the second declaration: durable, bounded by
/// `x-max-length`, overflow rejects publishes instead of dropping heads.
pub(crate) async fn declare_metadata_queue(
    channel: &Channel,
    settings: &Settings,
) -> Result<(), lapin::Error> {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-max-length".into(),
        AMQPValue::LongInt(settings.queue_max_length as i32),
    );
    arguments.insert(
        "x-overflow".into(),
        AMQPValue::LongString("reject-publish".into()),
    );
    channel
        .queue_declare(
            &settings.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map(|_| ())
}
