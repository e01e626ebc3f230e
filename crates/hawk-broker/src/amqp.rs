//! AMQP 0-9-1 adapter built on `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use hawk_core::BrokerError;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::message::{Acknowledger, Message};
use crate::session::{Connected, Connector, DeliveryStream, Session, CONTENT_TYPE_JSON};

const REPLY_SUCCESS: u16 = 200;
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Dials an AMQP broker, one connection and one channel per dial.
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Connected, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let closed = CancellationToken::new();
        let signal = closed.clone();
        connection.on_error(move |err| {
            tracing::warn!(error = %err, "AMQP connection error");
            signal.cancel();
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel open failed").await;
                return Err(BrokerError::Connect(format!("failed to open channel: {}", e)));
            }
        };

        let signal = closed.clone();
        channel.on_error(move |err| {
            tracing::warn!(error = %err, "AMQP channel error");
            signal.cancel();
        });

        Ok(Connected {
            session: Arc::new(AmqpSession {
                connection,
                channel,
            }),
            closed,
        })
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("failed to set prefetch: {}", e)))
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer_tag = format!("hawk-{}", Uuid::new_v4());
        let options = BasicConsumeOptions {
            no_local: false,
            no_ack: false,
            exclusive: false,
            nowait: false,
        };
        let consumer = self
            .channel
            .basic_consume(queue, &consumer_tag, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let deliveries = consumer.map(|delivery| match delivery {
            Ok(delivery) => {
                let acker = AmqpAcker {
                    acker: delivery.acker,
                    delivery_tag: delivery.delivery_tag,
                };
                Ok(Message::new(
                    delivery.delivery_tag,
                    delivery.redelivered,
                    delivery.data,
                    Box::new(acker),
                ))
            }
            Err(e) => Err(BrokerError::ConnectionClosed(e.to_string())),
        });
        Ok(deliveries.boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let publish_error = |e: lapin::Error| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        };
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "Failed to close AMQP channel");
        }
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| BrokerError::Close(e.to_string()))
    }
}

struct AmqpAcker {
    acker: Acker,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Disposition {
                delivery_tag: self.delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BrokerError::Disposition {
                delivery_tag: self.delivery_tag,
                reason: e.to_string(),
            })
    }
}
