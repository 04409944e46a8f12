//! # Store Link
//!
//! Purpose: Expose one live link to the store as a single handle: a pooled
//! command path, a lazily started subscriber hub, a health flag and a close.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `StoreLink` hides pooling, handshakes and pub/sub
//!    framing from the typed layer above.
//! 2. **Borrow-Friendly API**: Commands are `&[&[u8]]` to avoid copies.
//! 3. **Fail Fast**: The constructor proves the endpoint answers PING.
//! 4. **Health as a Flag**: Any socket failure flips `is_connected` to false;
//!    re-creating the link is the owner's decision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::{EventRelay, EventSink, LifecycleEvent};
use crate::pool::{Connection, ConnectionPool, ConnectionSettings, PoolConfig};
use crate::resp::RespValue;
use crate::subscriber::{MessageHandler, SubscriberHub};

/// Configuration for a store link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Candidate endpoints, tried in order; the first that answers wins.
    pub endpoints: Vec<String>,
    /// Connection handshake and timeout settings.
    pub settings: ConnectionSettings,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Channel carrying configuration broadcasts, if any.
    pub config_channel: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            endpoints: vec!["127.0.0.1:6379".to_string()],
            settings: ConnectionSettings {
                connect_timeout: Some(Duration::from_secs(5)),
                ..ConnectionSettings::default()
            },
            max_idle: 8,
            max_total: 16,
            config_channel: None,
        }
    }
}

/// Live link to one store endpoint.
pub struct StoreLink {
    config: LinkConfig,
    endpoint: String,
    pool: ConnectionPool,
    hub: Mutex<Option<Arc<SubscriberHub>>>,
    relay: Arc<EventRelay>,
    healthy: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl StoreLink {
    /// Connects to the first reachable endpoint and verifies it with PING.
    pub fn connect(config: LinkConfig, sink: Arc<dyn EventSink>) -> ClientResult<Self> {
        Self::connect_with(config, Arc::new(EventRelay::new(sink)))
    }

    /// Like [`StoreLink::connect`], emitting through a caller-owned relay.
    ///
    /// Pass a held relay to collect the connect-time events and deliver them
    /// later with [`EventRelay::release`].
    pub fn connect_with(config: LinkConfig, relay: Arc<EventRelay>) -> ClientResult<Self> {
        if config.endpoints.is_empty() {
            return Err(ClientError::InvalidAddress(String::new()));
        }

        let mut last_err = ClientError::InvalidAddress(String::new());
        for endpoint in &config.endpoints {
            let healthy = Arc::new(AtomicBool::new(true));
            let pool = ConnectionPool::new(
                PoolConfig {
                    endpoint: endpoint.clone(),
                    settings: config.settings.clone(),
                    max_idle: config.max_idle,
                    max_total: config.max_total,
                },
                relay.clone(),
                healthy.clone(),
            );
            match ping(&pool) {
                Ok(()) => {
                    info!(endpoint = %endpoint, "store link connected");
                    let link = StoreLink {
                        endpoint: endpoint.clone(),
                        config: config.clone(),
                        pool,
                        hub: Mutex::new(None),
                        relay,
                        healthy,
                        closed: AtomicBool::new(false),
                    };
                    link.watch_config_channel()?;
                    return Ok(link);
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "endpoint unreachable");
                    pool.close();
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Endpoint the link is attached to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Configuration the link was created with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// False once the link was closed or any of its sockets failed.
    ///
    /// Idle pooled sockets are checked first, so a peer that hung up while
    /// the link sat idle is noticed before the next command is written.
    pub fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.pool.evict_closed();
        self.is_healthy()
    }

    /// Health flag only; unlike `is_connected` this never touches sockets
    /// and never emits events.
    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.healthy.load(Ordering::Acquire)
    }

    /// Executes one command in database `db` and returns its reply.
    pub fn exec(&self, db: u32, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.ensure_open()?;
        let mut conn = self.pool.acquire()?;
        conn.exec(db, args)
    }

    /// Sends one command in database `db` without waiting for its reply.
    pub fn send(&self, db: u32, args: &[&[u8]]) -> ClientResult<()> {
        self.ensure_open()?;
        let mut conn = self.pool.acquire()?;
        conn.send(db, args)
    }

    /// Opens a dedicated, unpooled connection to `endpoint`.
    ///
    /// The link's credentials and timeouts are reused.
    pub fn open_server(&self, endpoint: &str) -> ClientResult<Connection> {
        self.ensure_open()?;
        Connection::open(endpoint, &self.config.settings)
    }

    /// Returns the subscriber hub, starting it on first use.
    pub fn subscriber(&self) -> ClientResult<Arc<SubscriberHub>> {
        self.ensure_open()?;
        let mut slot = self.hub.lock();
        if let Some(hub) = slot.as_ref() {
            if !hub.is_closed() {
                return Ok(hub.clone());
            }
        }
        let hub = SubscriberHub::start(
            &self.endpoint,
            &self.config.settings,
            self.relay.clone(),
            self.healthy.clone(),
        )?;
        *slot = Some(hub.clone());
        Ok(hub)
    }

    /// Stops lifecycle event delivery from this link.
    pub fn detach_events(&self) {
        self.relay.detach();
    }

    /// Closes the pool and the subscriber hub. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close();
        if let Some(hub) = self.hub.lock().take() {
            hub.close();
        }
        info!(endpoint = %self.endpoint, "store link closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idle pooled connections, mostly useful for diagnostics.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_len()
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn watch_config_channel(&self) -> ClientResult<()> {
        let Some(channel) = self.config.config_channel.clone() else {
            return Ok(());
        };
        let hub = self.subscriber()?;
        let relay = self.relay.clone();
        let endpoint = self.endpoint.clone();
        let handler: MessageHandler = Arc::new(move |_channel: &str, _payload: &[u8]| {
            relay.emit(LifecycleEvent::ConfigurationChangedBroadcast {
                endpoint: endpoint.clone(),
            });
        });
        hub.subscribe(&channel, handler)?;
        debug!(channel = %channel, "watching configuration broadcasts");
        Ok(())
    }
}

impl Drop for StoreLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn ping(pool: &ConnectionPool) -> ClientResult<()> {
    let mut conn = pool.acquire()?;
    match conn.exec(0, &[b"PING"])? {
        RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
