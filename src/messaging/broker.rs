use crate::error::Error;
use crate::messaging::event::{topic_matches, EventMessage, EventType};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback function type for event handling
pub type EventCallback = Arc<dyn Fn(EventMessage) -> Result<()> + Send + Sync>;

const DEFAULT_CAPACITY: usize = 256;

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish an event
    async fn publish<T: Serialize + Send>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) -> Result<()>;

    /// Subscribe to an event type
    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String>;

    /// Subscribe to all events from a specific source
    async fn subscribe_source(&self, source_id: Uuid, callback: EventCallback) -> Result<String>;

    /// Subscribe to a specific routing pattern
    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String>;

    /// Unsubscribe from a subscription
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// In-process broker. Every subscription is a consumer task reading its own
/// receiver of a broadcast channel, so a slow subscriber lags alone.
pub struct EventBroker {
    sender: broadcast::Sender<EventMessage>,
    /// Subscriptions map
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Abort every consumer task
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
        info!("Event broker stopped");
    }

    /// Start a consumer for events accepted by `filter`
    async fn start_consumer<F>(&self, description: String, filter: F, callback: EventCallback) -> Result<String>
    where
        F: Fn(&EventMessage) -> bool + Send + Sync + 'static,
    {
        // Receiver exists before we return, so nothing published afterwards is missed
        let mut receiver = self.sender.subscribe();
        let subscription_id = Uuid::new_v4().to_string();
        let subscription_id_clone = subscription_id.clone();

        let handle = tokio::spawn(async move {
            debug!("Started consumer for {} (subscription: {})", description, subscription_id_clone);

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if !filter(&event) {
                            continue;
                        }
                        debug!("Received event: {} ({})", event.event_type, event.id);
                        if let Err(e) = callback(event) {
                            error!("Error processing event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Consumer for {} lagged, {} events skipped", description, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            debug!("Consumer stopped for {} (subscription: {})", description, subscription_id_clone);
        });

        self.subscriptions.write().await.insert(subscription_id.clone(), handle);

        Ok(subscription_id)
    }
}

#[async_trait]
impl MessageBrokerTrait for EventBroker {
    async fn publish<T: Serialize + Send>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) -> Result<()> {
        let event = EventMessage::new(event_type, source_id, payload)
            .map_err(|e| Error::Serialization(format!("Failed to encode event payload: {}", e)))?;
        let routing_key = event.routing_key();
        let event_id = event.id;

        match self.sender.send(event) {
            Ok(receivers) => debug!("Published event: {} with routing key: {} to {} receivers", event_id, routing_key, receivers),
            // No subscribers is not a failure
            Err(_) => debug!("Published event: {} with routing key: {} (no subscribers)", event_id, routing_key),
        }

        Ok(())
    }

    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String> {
        let description = event_type.to_string();
        self.start_consumer(description, move |event| event.event_type == event_type, callback)
            .await
    }

    async fn subscribe_source(&self, source_id: Uuid, callback: EventCallback) -> Result<String> {
        self.start_consumer(
            format!("source {}", source_id),
            move |event| event.source_id == Some(source_id),
            callback,
        )
        .await
    }

    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        let pattern_owned = pattern.to_string();
        self.start_consumer(
            format!("pattern {}", pattern),
            move |event| topic_matches(&pattern_owned, &event.routing_key()),
            callback,
        )
        .await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(handle) = subscriptions.remove(subscription_id) {
            handle.abort();
            info!("Unsubscribed: {}", subscription_id);
            Ok(())
        } else {
            Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into())
        }
    }
}

/// Create a broker service
pub fn create_event_broker(capacity: usize) -> Arc<EventBroker> {
    Arc::new(EventBroker::new(capacity))
}
