//! # TKV Typed Store Façade
//!
//! Purpose: Give application code strongly typed access to a remote
//! Redis-compatible key/value and pub/sub store. Values travel as JSON text;
//! one shared, self-healing connection backs every call.
//!
//! ## Design Principles
//! 1. **Explicit Instance**: A [`ConnectionManager`] is created and cloned by
//!    the application; there is no global connection.
//! 2. **Typed Boundaries**: Operations are generic over serde traits; absent
//!    values decode to `T::default()`.
//! 3. **Self-Healing**: Every call goes through `ConnectionManager::current`,
//!    which reconnects with the last applied descriptor when needed.
//! 4. **Observable Lifecycle**: Connection events are logged with `tracing`
//!    and forwarded to registered observers.
//!
//! ## Usage
//!
//! ```no_run
//! use tkv::{ConnectionDescriptor, ConnectionManager, SetCondition};
//!
//! # fn main() -> Result<(), tkv::StoreError> {
//! let descriptor: ConnectionDescriptor = "localhost:6379,name=orders".parse()?;
//! let manager = ConnectionManager::connect(descriptor)?;
//! let db = manager.database(0);
//!
//! db.hset("user:1", "name", "Ada", SetCondition::Always)?;
//! let name: String = db.hget("user:1", "name")?;
//! assert_eq!(name, "Ada");
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod database;
mod descriptor;
mod error;
mod hashes;
mod keys;
mod lists;
mod manager;
mod observers;
mod pubsub;
mod sets;
mod strings;

pub use codec::{CodecError, CodecResult, JsonCodec};
pub use database::{CommandFlags, Database};
pub use descriptor::ConnectionDescriptor;
pub use error::{StoreError, StoreResult};
pub use manager::ConnectionManager;
pub use observers::{LifecycleObservers, ObserverId};
pub use pubsub::{Subscriber, Subscription};
pub use strings::SetCondition;
pub use tkv_client::{FailureKind, LifecycleEvent};
