//! Channel provider seams consumed by the event target.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked by a [`SubscribeClient`] for every message received on a
/// subscribed channel: `(channel, message)`.
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Publishing half of a pub/sub client pair.
#[async_trait]
pub trait PublishClient: Send + Sync + 'static {
    /// Publish `message` on `channel`.
    async fn publish(&self, channel: &str, message: String) -> Result<()>;
}

/// Subscribing half of a pub/sub client pair.
///
/// Most providers require a dedicated connection for subscriptions, which is
/// why publishing and subscribing are separate clients.
#[async_trait]
pub trait SubscribeClient: Send + Sync + 'static {
    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Register a handler for incoming messages. Delivery is driven by the
    /// client; handlers must not block.
    fn on_message(&self, handler: MessageHandler);
}

#[async_trait]
impl<T: PublishClient + ?Sized> PublishClient for Arc<T> {
    async fn publish(&self, channel: &str, message: String) -> Result<()> {
        (**self).publish(channel, message).await
    }
}

#[async_trait]
impl<T: SubscribeClient + ?Sized> SubscribeClient for Arc<T> {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        (**self).subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        (**self).unsubscribe(channel).await
    }

    fn on_message(&self, handler: MessageHandler) {
        (**self).on_message(handler)
    }
}
