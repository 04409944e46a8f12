//! # Lifecycle Events
//!
//! Purpose: Describe connection lifecycle notifications and route them from
//! link internals (pool, subscriber thread) to whoever registered a sink.
//!
//! ## Design Principles
//! 1. **Observer Pattern**: The link only knows the `EventSink` seam.
//! 2. **Detachable**: `EventRelay::detach` stops delivery from a handle that
//!    is being torn down, even if its threads still emit.
//! 3. **Deferred Delivery**: A held relay queues events raised under the
//!    owner's locks and delivers them on `release`.
//! 4. **Diagnostic Only**: Emitting never fails and never alters control flow.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Why a connection was considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// TCP connect did not succeed.
    UnableToConnect,
    /// AUTH or CLIENT SETNAME was rejected.
    AuthenticationFailure,
    /// Socket read or write failed on an established connection.
    SocketFailure,
    /// Peer closed the socket.
    ConnectionDisposed,
    /// Reply framing was invalid.
    ProtocolFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::UnableToConnect => "unable to connect",
            FailureKind::AuthenticationFailure => "authentication failure",
            FailureKind::SocketFailure => "socket failure",
            FailureKind::ConnectionDisposed => "connection disposed",
            FailureKind::ProtocolFailure => "protocol failure",
        };
        f.write_str(text)
    }
}

/// Lifecycle notification emitted by the link or the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A descriptor was applied to an endpoint.
    ConfigurationChanged { endpoint: String },
    /// A configuration broadcast was received over pub/sub.
    ConfigurationChangedBroadcast { endpoint: String },
    /// A connection was re-established after a failure.
    ConnectionRestored { endpoint: String },
    /// A connection failed.
    ConnectionFailed {
        endpoint: String,
        failure: FailureKind,
        message: Option<String>,
    },
    /// The server answered with an error reply.
    ErrorMessage { endpoint: String, message: String },
    /// Link internals hit an unexpected condition.
    InternalError { origin: String, message: String },
    /// The server reported that a hash slot lives elsewhere.
    HashSlotMoved {
        slot: u16,
        old_endpoint: String,
        new_endpoint: String,
    },
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::ConfigurationChanged { endpoint } => {
                write!(f, "configuration changed: {}", endpoint)
            }
            LifecycleEvent::ConfigurationChangedBroadcast { endpoint } => {
                write!(f, "configuration changed (broadcast): {}", endpoint)
            }
            LifecycleEvent::ConnectionRestored { endpoint } => {
                write!(f, "connection restored: {}", endpoint)
            }
            LifecycleEvent::ConnectionFailed {
                endpoint,
                failure,
                message,
            } => match message {
                Some(message) => {
                    write!(f, "connection failed: {} ({}): {}", endpoint, failure, message)
                }
                None => write!(f, "connection failed: {} ({})", endpoint, failure),
            },
            LifecycleEvent::ErrorMessage { endpoint, message } => {
                write!(f, "error message from {}: {}", endpoint, message)
            }
            LifecycleEvent::InternalError { origin, message } => {
                write!(f, "internal error in {}: {}", origin, message)
            }
            LifecycleEvent::HashSlotMoved {
                slot,
                old_endpoint,
                new_endpoint,
            } => write!(f, "hash slot {} moved: {} -> {}", slot, old_endpoint, new_endpoint),
        }
    }
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

enum Delivery {
    Live,
    Held(Vec<LifecycleEvent>),
    Detached,
}

/// Shared, detachable forwarder in front of an `EventSink`.
///
/// A held relay queues events until [`EventRelay::release`], letting an owner
/// that is holding its own locks publish them once those are dropped.
pub struct EventRelay {
    sink: Arc<dyn EventSink>,
    delivery: Mutex<Delivery>,
}

impl EventRelay {
    /// Creates a relay forwarding to `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        EventRelay {
            sink,
            delivery: Mutex::new(Delivery::Live),
        }
    }

    /// Creates a relay that queues events until released.
    pub fn held(sink: Arc<dyn EventSink>) -> Self {
        EventRelay {
            sink,
            delivery: Mutex::new(Delivery::Held(Vec::new())),
        }
    }

    /// Forwards an event, queues it while held, or drops it once detached.
    pub fn emit(&self, event: LifecycleEvent) {
        {
            let mut delivery = self.delivery.lock();
            match &mut *delivery {
                Delivery::Live => {}
                Delivery::Held(queued) => {
                    queued.push(event);
                    return;
                }
                Delivery::Detached => return,
            }
        }
        // The sink runs without the lock held.
        self.sink.emit(event);
    }

    /// Delivers queued events and switches to direct forwarding.
    ///
    /// No-op on a live or detached relay.
    pub fn release(&self) {
        let queued = {
            let mut delivery = self.delivery.lock();
            match &mut *delivery {
                Delivery::Held(queued) => {
                    let queued = std::mem::take(queued);
                    *delivery = Delivery::Live;
                    queued
                }
                _ => return,
            }
        };
        for event in queued {
            self.sink.emit(event);
        }
    }

    /// Stops forwarding events. Queued events are discarded.
    pub fn detach(&self) {
        *self.delivery.lock() = Delivery::Detached;
    }

    pub fn is_attached(&self) -> bool {
        !matches!(*self.delivery.lock(), Delivery::Detached)
    }
}

/// Builds the event for a `-MOVED <slot> <endpoint>` error reply.
pub fn moved_event(current_endpoint: &str, message: &str) -> Option<LifecycleEvent> {
    let mut parts = message.split_whitespace();
    if parts.next()? != "MOVED" {
        return None;
    }
    let slot = parts.next()?.parse().ok()?;
    let new_endpoint = parts.next()?.to_string();
    Some(LifecycleEvent::HashSlotMoved {
        slot,
        old_endpoint: current_endpoint.to_string(),
        new_endpoint,
    })
}
