//! Typed pub/sub facade used by subscription resolvers.

use super::{EventTarget, Listener, PubSubEvent};
use crate::error::Result;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

/// Publish/subscribe API over an [`EventTarget`].
#[derive(Clone)]
pub struct PubSub {
    target: Arc<EventTarget>,
}

impl PubSub {
    pub fn new(target: Arc<EventTarget>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &Arc<EventTarget> {
        &self.target
    }

    /// Publish a JSON-serializable payload on `topic`.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<()> {
        let data = serde_json::to_value(payload)?;
        self.target
            .dispatch_event(PubSubEvent::new(topic, Some(data)))
            .await
    }

    /// Publish an event without payload.
    pub async fn publish_empty(&self, topic: &str) -> Result<()> {
        self.target.dispatch_event(PubSubEvent::new(topic, None)).await
    }

    /// Subscribe to `topic`. The returned stream yields each event's payload
    /// and unregisters its listener when dropped.
    pub async fn subscribe(&self, topic: &str) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Listener::new(move |event: &PubSubEvent| {
            let _ = tx.send(event.data.clone());
        });
        self.target.add_listener(topic, listener.clone()).await?;
        Ok(EventStream {
            rx,
            target: self.target.clone(),
            topic: topic.to_string(),
            listener,
        })
    }
}

/// Stream of payloads for one topic subscription.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Option<serde_json::Value>>,
    target: Arc<EventTarget>,
    topic: String,
    listener: Listener,
}

impl EventStream {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for EventStream {
    type Item = Option<serde_json::Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        let target = self.target.clone();
        let topic = std::mem::take(&mut self.topic);
        let listener = self.listener.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = target.remove_listener(&topic, &listener).await {
                        warn!(topic = %topic, error = %e, "failed to remove listener");
                    }
                });
            }
            Err(_) => warn!(topic = %topic, "event stream dropped outside a runtime; listener leaked"),
        }
    }
}
