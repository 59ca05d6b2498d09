//! Cross-process pub/sub bridge for GraphQL subscriptions.
//!
//! [`EventTarget`] adapts a pub/sub client pair onto an event-target
//! interface: listeners are registered per topic, events dispatched on any
//! process are published through the channel provider, and messages coming
//! back from the provider are decoded and handed to the local listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use graphql_plugin_kit::pubsub::{EventTarget, MemoryBroker, PubSub};
//!
//! # async fn example() -> graphql_plugin_kit::Result<()> {
//! let broker = MemoryBroker::new();
//! let target = EventTarget::new(broker.connect(), broker.connect());
//! let pubsub = PubSub::new(target);
//!
//! let mut stream = pubsub.subscribe("user:created").await?;
//! pubsub.publish("user:created", &serde_json::json!({ "id": 1 })).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod memory;
mod stream;

pub use client::{MessageHandler, PublishClient, SubscribeClient};
pub use memory::{MemoryBroker, MemoryConnection};
pub use stream::{EventStream, PubSub};

use crate::error::Result;
use crate::metrics::PluginMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// An event flowing through the bridge. `data: None` is the empty payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubEvent {
    pub topic: String,
    pub data: Option<serde_json::Value>,
}

impl PubSubEvent {
    pub fn new(topic: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Wire form of the payload: JSON, or the empty string for no payload.
    pub fn encode_payload(&self) -> Result<String> {
        match &self.data {
            Some(value) => Ok(serde_json::to_string(value)?),
            None => Ok(String::new()),
        }
    }

    /// Inverse of [`PubSubEvent::encode_payload`].
    pub fn decode(topic: &str, message: &str) -> Result<Self> {
        let data = if message.is_empty() {
            None
        } else {
            Some(serde_json::from_str(message)?)
        };
        Ok(Self::new(topic, data))
    }
}

/// A listener callback. Identity is the handle: clones of one `Listener`
/// are the same listener, two separately created ones never are.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&PubSubEvent) + Send + Sync>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&PubSubEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, event: &PubSubEvent) {
        (self.0)(event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

/// Event target backed by a pub/sub client pair.
pub struct EventTarget {
    publisher: Box<dyn PublishClient>,
    subscriber: Box<dyn SubscribeClient>,
    /// Topic -> listeners in insertion order, without duplicates
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl EventTarget {
    /// Build an event target and register its message handler on the
    /// subscribe client.
    pub fn new<P, S>(publisher: P, subscriber: S) -> Arc<Self>
    where
        P: PublishClient,
        S: SubscribeClient,
    {
        Arc::new_cyclic(|weak: &Weak<EventTarget>| {
            let weak = weak.clone();
            subscriber.on_message(Arc::new(move |channel: &str, message: &str| {
                if let Some(target) = weak.upgrade() {
                    target.on_message(channel, message);
                }
            }));
            Self {
                publisher: Box::new(publisher),
                subscriber: Box::new(subscriber),
                listeners: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Register `listener` for `topic`. The first listener for a topic
    /// subscribes the topic on the subscribe client.
    pub async fn add_listener(&self, topic: &str, listener: Listener) -> Result<()> {
        let first = {
            let mut listeners = self.listeners.lock();
            match listeners.get_mut(topic) {
                Some(set) => {
                    if !set.contains(&listener) {
                        set.push(listener.clone());
                    }
                    false
                }
                None => {
                    listeners.insert(topic.to_string(), vec![listener.clone()]);
                    true
                }
            }
        };

        if first {
            debug!(topic, "subscribing topic");
            if let Err(e) = self.subscriber.subscribe(topic).await {
                // Roll back so the next listener retries the subscription
                let mut listeners = self.listeners.lock();
                if let Some(set) = listeners.get_mut(topic) {
                    set.retain(|l| l != &listener);
                    if set.is_empty() {
                        listeners.remove(topic);
                    }
                }
                warn!(topic, error = %e, "failed to subscribe topic");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unregister `listener` from `topic`. Removing the last listener
    /// deletes the topic and unsubscribes it.
    pub async fn remove_listener(&self, topic: &str, listener: &Listener) -> Result<()> {
        let emptied = {
            let mut listeners = self.listeners.lock();
            let Some(set) = listeners.get_mut(topic) else {
                return Ok(());
            };
            set.retain(|l| l != listener);
            if set.is_empty() {
                listeners.remove(topic);
                true
            } else {
                false
            }
        };

        if emptied {
            debug!(topic, "unsubscribing topic");
            self.subscriber.unsubscribe(topic).await?;
        }
        Ok(())
    }

    /// Publish `event` through the publish client. Local listeners are only
    /// invoked once the provider delivers the message back.
    pub async fn dispatch_event(&self, event: PubSubEvent) -> Result<()> {
        let message = event.encode_payload()?;
        self.publisher.publish(&event.topic, message).await?;
        PluginMetrics::global().events_published.inc();
        Ok(())
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.lock().get(topic).map_or(0, Vec::len)
    }

    pub fn topics(&self) -> Vec<String> {
        self.listeners.lock().keys().cloned().collect()
    }

    fn on_message(&self, channel: &str, message: &str) {
        let Some(listeners) = self.listeners.lock().get(channel).cloned() else {
            return;
        };

        let event = match PubSubEvent::decode(channel, message) {
            Ok(event) => event,
            Err(e) => {
                PluginMetrics::global().malformed_messages.inc();
                warn!(channel, error = %e, "dropping undecodable pub/sub message");
                return;
            }
        };

        for listener in &listeners {
            listener.call(&event);
        }
        PluginMetrics::global()
            .events_delivered
            .inc_by(listeners.len() as u64);
    }
}
