//! In-process channel provider.
//!
//! A [`MemoryBroker`] plays the role of a shared pub/sub server; each
//! [`MemoryConnection`] plays the role of one server process's connection to
//! it. Publishing on any connection reaches the handlers of every connection
//! subscribed to the channel, synchronously and in connection order.

use super::client::{MessageHandler, PublishClient, SubscribeClient};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct BrokerInner {
    connections: Mutex<Vec<Weak<ConnectionInner>>>,
}

#[derive(Default)]
struct ConnectionInner {
    channels: Mutex<HashSet<String>>,
    handlers: Mutex<Vec<MessageHandler>>,
}

/// Shared in-memory pub/sub server.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection. The connection implements both
    /// [`PublishClient`] and [`SubscribeClient`].
    pub fn connect(&self) -> MemoryConnection {
        let conn = Arc::new(ConnectionInner::default());
        let mut connections = self.inner.connections.lock();
        connections.retain(|c| c.strong_count() > 0);
        connections.push(Arc::downgrade(&conn));
        MemoryConnection {
            broker: self.clone(),
            inner: conn,
        }
    }

    /// Deliver `message` to every subscriber of `channel`. Returns the number
    /// of connections that received it.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        let receivers: Vec<Arc<ConnectionInner>> = self
            .inner
            .connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.channels.lock().contains(channel))
            .collect();

        for conn in &receivers {
            let handlers = conn.handlers.lock().clone();
            for handler in handlers {
                handler(channel, message);
            }
        }
        receivers.len()
    }

    /// Number of live connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.channels.lock().contains(channel))
            .count()
    }
}

/// One connection to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    inner: Arc<ConnectionInner>,
}

impl MemoryConnection {
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.channels.lock().contains(channel)
    }
}

#[async_trait]
impl PublishClient for MemoryConnection {
    async fn publish(&self, channel: &str, message: String) -> Result<()> {
        self.broker.publish(channel, &message);
        Ok(())
    }
}

#[async_trait]
impl SubscribeClient for MemoryConnection {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.inner.channels.lock().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.channels.lock().remove(channel);
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.handlers.lock().push(handler);
    }
}
