use crate::article::Article;
use crate::publish::{PublishError, Publisher};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

const PERSISTENT: u8 = 2;

/// Publishes articles as JSON to RabbitMQ queues through the default exchange.
///
/// One connection and one confirm-mode channel are opened at startup and
/// shared by every pipeline until [`AmqpPublisher::close`].
pub struct AmqpPublisher {
    connection: Connection,
    channel: Channel,
}

impl AmqpPublisher {
    /// Connects and declares each destination as a durable queue.
    pub async fn connect(uri: &str, destinations: &[&str]) -> Result<Self, PublishError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        for destination in destinations {
            channel
                .queue_declare(
                    destination,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            tracing::debug!(queue = %destination, "Declared queue");
        }

        Ok(Self {
            connection,
            channel,
        })
    }

    pub async fn close(&self) -> Result<(), PublishError> {
        self.channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, destination: &str, article: &Article) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(article)?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                destination,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked);
        }
        Ok(())
    }
}
