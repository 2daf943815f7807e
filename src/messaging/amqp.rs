use crate::config::PushConfig;
use crate::error::Error;
use crate::messaging::push::{PushEvent, PushListener, PushSource};
use crate::services::alert_service::AlertService;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Push source consuming alert events from a RabbitMQ topic exchange
pub struct AmqpPushSource {
    // Held so the consumer stays open
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
}

impl AmqpPushSource {
    /// Connect, declare the exchange and bind an exclusive queue to the routing pattern
    pub async fn connect(config: &PushConfig) -> Result<Self> {
        let connection = Connection::connect(&config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| Error::Messaging(format!("Failed to create AMQP connection: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::Messaging(format!("Failed to create RabbitMQ channel: {}", e)))?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Messaging(format!("Failed to declare exchange: {}", e)))?;

        let queue_name = format!(
            "detection-monitor.{}.{}",
            config.routing_pattern.replace('.', "_"),
            Uuid::new_v4()
        );

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Messaging(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &queue_name,
                &config.exchange,
                &config.routing_pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Messaging(format!("Failed to bind queue: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Messaging(format!("Failed to create consumer: {}", e)))?;

        info!(
            "Consuming push alerts from {} with pattern {}",
            config.exchange, config.routing_pattern
        );

        Ok(Self {
            _connection: connection,
            _channel: channel,
            consumer,
        })
    }
}

#[async_trait]
impl PushSource for AmqpPushSource {
    async fn next_event(&mut self) -> Option<PushEvent> {
        while let Some(delivery) = self.consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    let parsed = serde_json::from_slice::<PushEvent>(&delivery.data);

                    // Acknowledge either way; a bad message must not block the queue
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!("Failed to acknowledge message: {}", e);
                    }

                    match parsed {
                        Ok(event) => {
                            debug!("Received push event {:?}", event.id);
                            return Some(event);
                        }
                        Err(e) => error!("Failed to parse push event: {}", e),
                    }
                }
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    return None;
                }
            }
        }
        None
    }
}

/// Keep a push listener running against RabbitMQ, reconnecting after drops
pub fn spawn_amqp_listener(config: PushConfig, alerts: Arc<AlertService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let delay = Duration::from_millis(config.reconnect_delay_ms);

        loop {
            match AmqpPushSource::connect(&config).await {
                Ok(source) => {
                    // Inline so aborting this task also drops the consumer
                    PushListener::run(Box::new(source), alerts.clone()).await;
                    warn!("Push connection closed, reconnecting");
                }
                Err(e) => warn!("Push connection failed: {}", e),
            }

            tokio::time::sleep(delay).await;
        }
    })
}
