//! # TKV Store Link
//!
//! Purpose: Provide a lightweight, synchronous Redis-compatible link with
//! connection pooling, logical database selection, fire-and-forget sends and
//! a multiplexed subscriber connection.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Observer Pattern**: Lifecycle notifications flow through `EventSink`.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod error;
mod events;
mod link;
mod pool;
mod resp;
mod subscriber;

pub use error::{ClientError, ClientResult};
pub use events::{EventRelay, EventSink, FailureKind, LifecycleEvent};
pub use link::{LinkConfig, StoreLink};
pub use pool::{Connection, ConnectionSettings};
pub use resp::RespValue;
pub use subscriber::{MessageHandler, SubscriberHub};
