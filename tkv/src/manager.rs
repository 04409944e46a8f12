//! # Connection Manager
//!
//! Purpose: Own the single live link to the store, create it lazily, replace
//! it on demand and re-create it when it reports itself unhealthy.
//!
//! ## Design Principles
//! 1. **Explicit Instance**: No process-wide state; clone the manager to share it.
//! 2. **Get-or-Create**: `current()` is the only way to reach the link, and it
//!    heals a missing or unhealthy link before returning.
//! 3. **Close, Then Publish**: A replaced link is detached and closed before
//!    its successor becomes visible, so at most one link is ever live.
//! 4. **Guarded Lifecycle**: Creation and teardown serialize on one mutex;
//!    the steady-state path only takes a short read lock to clone an `Arc`.
//! 5. **Notify Unlocked**: Events raised while the mutex is held are queued
//!    on a held relay and reach observers only after it is released.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionManager (Clone)
//!   └── inner: Arc<ManagerInner>
//!         ├── init_lock: Mutex<()>                        (create / destroy)
//!         ├── slot: RwLock<Option<Arc<StoreLink>>>         (published link)
//!         ├── descriptor: RwLock<Option<ConnectionDescriptor>>
//!         ├── observers: Arc<LifecycleObservers>          (event sink)
//!         └── codec: JsonCodec
//! ```

use std::sync::{mpsc, Arc};

use parking_lot::{Mutex, RwLock};
use tkv_client::{EventRelay, EventSink, LifecycleEvent, StoreLink};
use tracing::{debug, info};

use crate::codec::JsonCodec;
use crate::database::Database;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{StoreError, StoreResult};
use crate::observers::{LifecycleObservers, ObserverId};
use crate::pubsub::Subscriber;

struct ManagerInner {
    init_lock: Mutex<()>,
    slot: RwLock<Option<Arc<StoreLink>>>,
    descriptor: RwLock<Option<ConnectionDescriptor>>,
    observers: Arc<LifecycleObservers>,
    codec: JsonCodec,
}

/// Shared owner of the store link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Creates a manager that connects lazily with the default descriptor.
    pub fn new() -> Self {
        Self::with_codec(JsonCodec::default())
    }

    /// Creates a manager using `codec` for every typed operation.
    pub fn with_codec(codec: JsonCodec) -> Self {
        ConnectionManager {
            inner: Arc::new(ManagerInner {
                init_lock: Mutex::new(()),
                slot: RwLock::new(None),
                descriptor: RwLock::new(None),
                observers: Arc::new(LifecycleObservers::new()),
                codec,
            }),
        }
    }

    /// Creates a manager and initializes it with `descriptor`.
    pub fn connect(descriptor: ConnectionDescriptor) -> StoreResult<Self> {
        let manager = Self::new();
        manager.initialize(descriptor)?;
        Ok(manager)
    }

    /// Replaces the current link with one built from `descriptor`.
    ///
    /// The previous link, if any, is closed first. Concurrent callers are
    /// serialized; the last one to run wins.
    pub fn initialize(&self, descriptor: ConnectionDescriptor) -> StoreResult<()> {
        descriptor.validate()?;
        let relay = self.held_relay();
        let result = {
            let _guard = self.inner.init_lock.lock();
            self.teardown_locked();
            *self.inner.descriptor.write() = Some(descriptor.clone());
            self.establish(&descriptor, &relay)
        };
        relay.release();
        result.map(|_| ())
    }

    /// Closes the current link. No-op when there is none.
    ///
    /// The last applied descriptor is kept, so the next access reconnects
    /// with it.
    pub fn teardown(&self) {
        let _guard = self.inner.init_lock.lock();
        self.teardown_locked();
    }

    /// Closes the current link and forgets the applied descriptor.
    pub fn reset(&self) {
        let _guard = self.inner.init_lock.lock();
        self.teardown_locked();
        self.inner.descriptor.write().take();
    }

    /// Returns the live link, creating or re-creating it when needed.
    ///
    /// A reconnect blocks the caller for the connect round trip.
    pub fn current(&self) -> StoreResult<Arc<StoreLink>> {
        if let Some(link) = self.healthy_link() {
            return Ok(link);
        }
        let relay = self.held_relay();
        let result = self.heal(&relay);
        relay.release();
        result
    }

    /// True when a link has been published (healthy or not).
    pub fn is_initialized(&self) -> bool {
        self.inner.slot.read().is_some()
    }

    /// True when the published link reports itself healthy.
    pub fn is_connected(&self) -> bool {
        self.healthy_link().is_some()
    }

    /// The last applied descriptor, if one was applied.
    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.inner.descriptor.read().clone()
    }

    pub fn codec(&self) -> &JsonCodec {
        &self.inner.codec
    }

    /// Handle on logical database `index` with default command flags.
    pub fn database(&self, index: u32) -> Database {
        Database::new(self.clone(), index)
    }

    /// Subscriber bound to the current link.
    pub fn subscriber(&self) -> StoreResult<Subscriber> {
        let link = self.current()?;
        let hub = link.subscriber()?;
        Ok(Subscriber::new(hub, self.database(0)))
    }

    /// Registers a lifecycle callback.
    pub fn observe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.observers.register(callback)
    }

    /// Removes a lifecycle callback.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Stream of lifecycle events emitted from now on.
    pub fn events(&self) -> mpsc::Receiver<LifecycleEvent> {
        self.inner.observers.stream()
    }

    /// Published link if it is connected. May emit events, so it must not
    /// run under `init_lock`.
    fn healthy_link(&self) -> Option<Arc<StoreLink>> {
        let link = self.inner.slot.read().clone()?;
        link.is_connected().then_some(link)
    }

    fn held_relay(&self) -> Arc<EventRelay> {
        let sink: Arc<dyn EventSink> = self.inner.observers.clone();
        Arc::new(EventRelay::held(sink))
    }

    /// Re-creates the link under `init_lock`, queueing events on `relay`.
    fn heal(&self, relay: &Arc<EventRelay>) -> StoreResult<Arc<StoreLink>> {
        let _guard = self.inner.init_lock.lock();
        // Another caller may have healed the link while we waited.
        let published = self.inner.slot.read().clone();
        if let Some(link) = published.filter(|link| link.is_healthy()) {
            return Ok(link);
        }

        let replaced = self.teardown_locked();
        let descriptor = self.inner.descriptor.read().clone().unwrap_or_default();
        let link = self.establish(&descriptor, relay)?;
        if replaced {
            relay.emit(LifecycleEvent::ConnectionRestored {
                endpoint: link.endpoint().to_string(),
            });
        }
        Ok(link)
    }

    /// Must be called with `init_lock` held. Returns true if a link was closed.
    fn teardown_locked(&self) -> bool {
        let previous = self.inner.slot.write().take();
        match previous {
            Some(link) => {
                link.detach_events();
                link.close();
                info!(endpoint = %link.endpoint(), "store connection torn down");
                true
            }
            None => false,
        }
    }

    /// Must be called with `init_lock` held. `relay` becomes the new link's
    /// relay; the caller releases it once the lock is dropped.
    fn establish(
        &self,
        descriptor: &ConnectionDescriptor,
        relay: &Arc<EventRelay>,
    ) -> StoreResult<Arc<StoreLink>> {
        debug!(descriptor = %descriptor, "connecting to store");
        let link = StoreLink::connect_with(descriptor.link_config(), relay.clone())
            .map_err(StoreError::Connection)?;
        let link = Arc::new(link);
        info!(endpoint = %link.endpoint(), "store connection initialized");
        relay.emit(LifecycleEvent::ConfigurationChanged {
            endpoint: link.endpoint().to_string(),
        });
        *self.inner.slot.write() = Some(link.clone());
        Ok(link)
    }
}
