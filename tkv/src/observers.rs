//! # Lifecycle Observers
//!
//! Purpose: Let application code watch connection lifecycle notifications
//! through registered callbacks or an `mpsc` stream.
//!
//! ## Design Principles
//! 1. **Observer Pattern**: Callbacks are registered and removed by id.
//! 2. **Diagnostic Only**: Every event is logged first; a panicking callback
//!    is caught and logged, never propagated.
//! 3. **Snapshot Dispatch**: Callbacks run without the registry lock held, so
//!    they may register or remove observers themselves.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::{Mutex, RwLock};
use tkv_client::{EventSink, LifecycleEvent};
use tracing::{debug, error, info, warn};

/// Callback receiving lifecycle events.
pub type Observer = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Handle returned by [`LifecycleObservers::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registry of lifecycle observers; also the event sink handed to links.
#[derive(Default)]
pub struct LifecycleObservers {
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_id: AtomicU64,
}

impl LifecycleObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback.
    pub fn register<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns false when the id was unknown.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Returns a receiver that gets a copy of every later event.
    ///
    /// The forwarding observer is removed once the receiver is dropped.
    pub fn stream(self: &Arc<Self>) -> mpsc::Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel();
        let sender = Mutex::new(tx);
        let registry = Arc::downgrade(self);
        let slot: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));
        let own_id = slot.clone();
        let id = self.register(move |event| {
            if sender.lock().send(event.clone()).is_err() {
                if let (Some(registry), Some(id)) = (registry.upgrade(), *own_id.lock()) {
                    registry.remove(id);
                }
            }
        });
        *slot.lock() = Some(id);
        rx
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logs the event and invokes each callback.
    pub fn notify(&self, event: &LifecycleEvent) {
        log_event(event);
        let snapshot: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!(event = %event, "lifecycle observer panicked");
            }
        }
    }
}

impl EventSink for LifecycleObservers {
    fn emit(&self, event: LifecycleEvent) {
        self.notify(&event);
    }
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::ConfigurationChanged { .. }
        | LifecycleEvent::ConfigurationChangedBroadcast { .. } => {
            debug!(event = %event, "store configuration");
        }
        LifecycleEvent::ConnectionRestored { .. } => info!(event = %event, "store connection"),
        LifecycleEvent::ConnectionFailed { .. } | LifecycleEvent::HashSlotMoved { .. } => {
            warn!(event = %event, "store connection");
        }
        LifecycleEvent::ErrorMessage { .. } => warn!(event = %event, "store error message"),
        LifecycleEvent::InternalError { .. } => error!(event = %event, "store internal error"),
    }
}
