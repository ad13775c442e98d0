//! Status-change subscribers.
//!
//! Callbacks are invoked synchronously, in registration order, on the task that committed
//! the change. The list is snapshotted before delivery, so a callback may subscribe,
//! unsubscribe or read controller status without deadlocking.

use super::state::EquipmentStatus;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Callback receiving `(new status, message)`.
pub type StatusCallback = Arc<dyn Fn(EquipmentStatus, &str) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Ordered subscriber list.
#[derive(Default)]
pub struct Notifier {
    subscribers: RwLock<Vec<(SubscriptionId, StatusCallback)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: StatusCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, callback));
        id
    }

    /// Remove a subscriber. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Deliver one change to every subscriber. A panicking callback is logged and skipped.
    pub fn notify(&self, status: EquipmentStatus, message: &str) {
        let snapshot: Vec<(SubscriptionId, StatusCallback)> = self.subscribers.read().clone();

        for (id, callback) in snapshot {
            let delivered = catch_unwind(AssertUnwindSafe(|| callback(status, message)));
            if delivered.is_err() {
                warn!(subscriber = ?id, %status, "Status subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}
