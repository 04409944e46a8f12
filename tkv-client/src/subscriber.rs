//! # Subscriber Hub
//!
//! Purpose: Multiplex every channel subscription of a link over one
//! dedicated connection, dispatching pushed messages to registered handlers.
//!
//! ## Design Principles
//! 1. **Fan-Out**: Each handler registered on a channel sees every message.
//! 2. **Single Reader**: One thread owns the read side; handlers run on it.
//! 3. **Ordered Control Writes**: SUBSCRIBE/UNSUBSCRIBE are written while the
//!    registry lock is held so they reach the server in registry order.
//! 4. **Panic Isolation**: A panicking handler is reported, never propagated.
//!
//! ## Structure Overview
//!
//! ```text
//! SubscriberHub
//!   ├── writer: Mutex<TcpStream>            (SUBSCRIBE / UNSUBSCRIBE)
//!   ├── channels: RwLock<HashMap<channel, Vec<Registration>>>
//!   ├── acked: Mutex<HashSet<channel>> + Condvar
//!   └── reader thread (Weak<SubscriberHub>)
//!         └── loop: read push -> dispatch -> handlers
//! ```

use std::collections::{HashMap, HashSet};
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::{EventRelay, FailureKind, LifecycleEvent};
use crate::pool::{Connection, ConnectionSettings};
use crate::resp::{encode_command, read_response, RespValue};

/// Callback invoked with `(channel, payload)` for each pushed message.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Upper bound on waiting for a SUBSCRIBE acknowledgement.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

struct Registration {
    id: u64,
    handler: MessageHandler,
}

/// Shared subscriber connection for one link.
pub struct SubscriberHub {
    endpoint: String,
    writer: Mutex<TcpStream>,
    channels: RwLock<HashMap<String, Vec<Registration>>>,
    acked: Mutex<HashSet<String>>,
    ack_signal: Condvar,
    ack_timeout: Duration,
    next_id: AtomicU64,
    closed: AtomicBool,
    reader_id: Mutex<Option<ThreadId>>,
    relay: Arc<EventRelay>,
    healthy: Arc<AtomicBool>,
}

impl SubscriberHub {
    /// Opens the subscriber connection and starts its reader thread.
    pub fn start(
        endpoint: &str,
        settings: &ConnectionSettings,
        relay: Arc<EventRelay>,
        healthy: Arc<AtomicBool>,
    ) -> ClientResult<Arc<Self>> {
        let conn = Connection::open(endpoint, settings)?;
        let (reader, writer) = conn.into_split()?;
        // The read side blocks until a push arrives or the socket closes.
        reader.get_ref().set_read_timeout(None)?;

        let hub = Arc::new(SubscriberHub {
            endpoint: endpoint.to_string(),
            writer: Mutex::new(writer),
            channels: RwLock::new(HashMap::new()),
            acked: Mutex::new(HashSet::new()),
            ack_signal: Condvar::new(),
            ack_timeout: settings.read_timeout.unwrap_or(DEFAULT_ACK_TIMEOUT),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            reader_id: Mutex::new(None),
            relay,
            healthy,
        });

        let weak = Arc::downgrade(&hub);
        let handle = thread::Builder::new()
            .name("tkv-subscriber".to_string())
            .spawn(move || read_loop(weak, reader))?;
        *hub.reader_id.lock() = Some(handle.thread().id());
        debug!(endpoint, "subscriber hub started");
        Ok(hub)
    }

    /// Endpoint the hub is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registers `handler` on `channel` and returns its registration id.
    ///
    /// The first registration on a channel sends SUBSCRIBE and waits for the
    /// server acknowledgement, so messages published afterwards are seen.
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> ClientResult<u64> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut channels = self.channels.write();
            let registrations = channels.entry(channel.to_string()).or_default();
            let first = registrations.is_empty();
            registrations.push(Registration { id, handler });
            if first {
                if let Err(err) = self.write_command(&[b"SUBSCRIBE", channel.as_bytes()]) {
                    channels.remove(channel);
                    return Err(err);
                }
            }
            first
        };

        if first && !self.on_reader_thread() {
            if let Err(err) = self.wait_for_ack(channel) {
                self.unsubscribe(channel, id);
                return Err(err);
            }
        }
        trace!(channel, id, "handler registered");
        Ok(id)
    }

    /// Removes a registration; the last one on a channel sends UNSUBSCRIBE.
    pub fn unsubscribe(&self, channel: &str, id: u64) {
        let mut channels = self.channels.write();
        let now_empty = match channels.get_mut(channel) {
            Some(registrations) => {
                registrations.retain(|registration| registration.id != id);
                registrations.is_empty()
            }
            None => return,
        };
        if now_empty {
            channels.remove(channel);
            self.acked.lock().remove(channel);
            if !self.is_closed() {
                if let Err(err) = self.write_command(&[b"UNSUBSCRIBE", channel.as_bytes()]) {
                    debug!(channel, error = %err, "unsubscribe write failed");
                }
            }
        }
    }

    /// Number of handlers registered on `channel`.
    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map(Vec::len).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the connection and drops all handlers.
    ///
    /// Does not wait for the reader thread, which exits once its read fails.
    /// A handler already running finishes on its own.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        self.ack_signal.notify_all();
        self.channels.write().clear();
        debug!(endpoint = %self.endpoint, "subscriber hub closed");
    }

    fn on_reader_thread(&self) -> bool {
        *self.reader_id.lock() == Some(thread::current().id())
    }

    fn write_command(&self, args: &[&[u8]]) -> ClientResult<()> {
        let mut buf = Vec::with_capacity(64);
        encode_command(args, &mut buf);
        let mut writer = self.writer.lock();
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    fn wait_for_ack(&self, channel: &str) -> ClientResult<()> {
        let mut acked = self.acked.lock();
        while !acked.contains(channel) {
            if self.is_closed() {
                return Err(ClientError::Closed);
            }
            if self.ack_signal.wait_for(&mut acked, self.ack_timeout).timed_out() {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no SUBSCRIBE acknowledgement for {}", channel),
                )));
            }
        }
        Ok(())
    }

    fn dispatch(&self, value: RespValue) {
        let mut items = match value {
            RespValue::Array(Some(items)) if !items.is_empty() => items.into_iter(),
            other => {
                self.internal_error(format!("unexpected push frame: {:?}", other));
                return;
            }
        };
        let kind = match items.next() {
            Some(RespValue::Bulk(Some(kind))) => kind,
            _ => {
                self.internal_error("push frame without kind".to_string());
                return;
            }
        };
        let channel = match items.next() {
            Some(RespValue::Bulk(Some(channel))) => String::from_utf8_lossy(&channel).into_owned(),
            _ => {
                self.internal_error("push frame without channel".to_string());
                return;
            }
        };

        match kind.as_slice() {
            b"message" => match items.next() {
                Some(RespValue::Bulk(Some(payload))) => self.deliver(&channel, &payload),
                _ => self.internal_error(format!("message on {} without payload", channel)),
            },
            b"subscribe" => {
                trace!(channel = %channel, "subscribe acknowledged");
                self.acked.lock().insert(channel);
                self.ack_signal.notify_all();
            }
            b"unsubscribe" => trace!(channel = %channel, "unsubscribe acknowledged"),
            other => debug!(
                kind = %String::from_utf8_lossy(other),
                channel = %channel,
                "ignored push"
            ),
        }
    }

    fn deliver(&self, channel: &str, payload: &[u8]) {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<MessageHandler> = match self.channels.read().get(channel) {
            Some(registrations) => registrations
                .iter()
                .map(|registration| registration.handler.clone())
                .collect(),
            None => return,
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(channel, payload))).is_err() {
                self.internal_error(format!("handler for channel {} panicked", channel));
            }
        }
    }

    fn internal_error(&self, message: String) {
        error!(endpoint = %self.endpoint, %message, "subscriber internal error");
        self.relay.emit(LifecycleEvent::InternalError {
            origin: "subscriber".to_string(),
            message,
        });
    }

    fn connection_lost(&self, err: &ClientError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.healthy.store(false, Ordering::Release);
        self.ack_signal.notify_all();
        let failure = match err {
            ClientError::Closed => FailureKind::ConnectionDisposed,
            ClientError::Protocol => FailureKind::ProtocolFailure,
            _ => FailureKind::SocketFailure,
        };
        warn!(endpoint = %self.endpoint, %failure, error = %err, "subscriber connection lost");
        self.relay.emit(LifecycleEvent::ConnectionFailed {
            endpoint: self.endpoint.clone(),
            failure,
            message: Some(err.to_string()),
        });
    }
}

impl Drop for SubscriberHub {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.writer.get_mut().shutdown(Shutdown::Both);
    }
}

fn read_loop(weak: Weak<SubscriberHub>, mut reader: BufReader<TcpStream>) {
    let mut line_buf = Vec::with_capacity(128);
    loop {
        let result = read_response(&mut reader, &mut line_buf);
        let Some(hub) = weak.upgrade() else {
            return;
        };
        if hub.is_closed() {
            return;
        }
        match result {
            Ok(value) => hub.dispatch(value),
            Err(err) => {
                hub.connection_lost(&err);
                return;
            }
        }
    }
}
