//! # Publish / Subscribe
//!
//! Purpose: Publish typed or raw messages and register channel handlers on
//! the link's subscriber hub.
//!
//! ## Design Principles
//! 1. **Fan-Out**: Every subscription on a channel receives every message.
//! 2. **Scoped Registration**: A [`Subscription`] unregisters its handler
//!    when dropped; the hub sends UNSUBSCRIBE once the channel has no
//!    handlers left.
//! 3. **Bounded by the Link**: Tearing the connection down closes the hub,
//!    after which every subscription reports itself inactive.
//!
//! Handlers run on the hub's reader thread. A slow handler delays delivery
//! of later messages on every channel of the same hub.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tkv_client::{MessageHandler, SubscriberHub};
use tracing::debug;

use crate::codec::CodecResult;
use crate::database::Database;
use crate::error::StoreResult;

impl Database {
    /// Encodes `message` and publishes it. Returns the receiver count.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> StoreResult<u64> {
        let text = self.encode(message)?;
        self.publish_raw(channel, &text)
    }

    /// Publishes `message` verbatim, bypassing the codec.
    pub fn publish_raw(&self, channel: &str, message: &str) -> StoreResult<u64> {
        Ok(self.call_integer(&[b"PUBLISH", channel.as_bytes(), message.as_bytes()])?.max(0) as u64)
    }
}

/// Entry point for channel subscriptions on the current link.
pub struct Subscriber {
    hub: Arc<SubscriberHub>,
    db: Database,
}

impl Subscriber {
    pub(crate) fn new(hub: Arc<SubscriberHub>, db: Database) -> Self {
        Subscriber { hub, db }
    }

    /// Registers `handler`, called with `(channel, message)` for each message.
    ///
    /// Returns once the server acknowledged the subscription.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> StoreResult<Subscription>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(move |channel: &str, payload: &[u8]| {
            handler(channel, &String::from_utf8_lossy(payload));
        });
        self.register(channel, handler)
    }

    /// Registers `handler` with each message decoded through the codec.
    ///
    /// Undecodable messages reach the handler as `Err`.
    pub fn subscribe_json<T, F>(&self, channel: &str, handler: F) -> StoreResult<Subscription>
    where
        T: DeserializeOwned + Default,
        F: Fn(&str, CodecResult<T>) + Send + Sync + 'static,
    {
        let codec = self.db.codec().clone();
        let handler: MessageHandler = Arc::new(move |channel: &str, payload: &[u8]| {
            handler(channel, codec.decode(Some(payload)));
        });
        self.register(channel, handler)
    }

    /// Same as [`Database::publish`] on database 0.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> StoreResult<u64> {
        self.db.publish(channel, message)
    }

    /// Same as [`Database::publish_raw`] on database 0.
    pub fn publish_raw(&self, channel: &str, message: &str) -> StoreResult<u64> {
        self.db.publish_raw(channel, message)
    }

    /// False once the connection this subscriber belongs to was torn down.
    pub fn is_active(&self) -> bool {
        !self.hub.is_closed()
    }

    fn register(&self, channel: &str, handler: MessageHandler) -> StoreResult<Subscription> {
        let id = self.hub.subscribe(channel, handler)?;
        debug!(channel, id, "subscribed");
        Ok(Subscription {
            hub: Arc::downgrade(&self.hub),
            channel: channel.to_string(),
            id,
        })
    }
}

/// Live handler registration; dropping it unsubscribes.
pub struct Subscription {
    hub: Weak<SubscriberHub>,
    channel: String,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// False once the owning connection was torn down.
    pub fn is_active(&self) -> bool {
        self.hub.upgrade().map(|hub| !hub.is_closed()).unwrap_or(false)
    }

    /// Unregisters the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.channel, self.id);
            debug!(channel = %self.channel, id = self.id, "unsubscribed");
        }
    }
}
