//! Interface to the shared key-value store.
//!
//! The store is assumed to provide durable nested records, change
//! subscriptions on any subtree, deferred writes that fire when a connection
//! drops, and an atomic read-modify-write on a single value. The session core
//! never talks to a network itself; it only calls this trait.

use std::fmt;
use std::sync::mpsc::Receiver;

use scorepad_wire::StorePath;

/// A value held in the store. JSON `null` means "absent".
pub type StoreValue = serde_json::Value;

/// Failures reported by a store connection.
///
/// All of these are transient from the session's point of view: the next
/// snapshot delivery retries whatever was lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstrateError {
    #[error("store connection is offline")]
    Offline,
    #[error("store state lock poisoned")]
    Poisoned,
}

/// Result of an atomic update.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    /// False when the update function declined to write.
    pub committed: bool,
    /// Value at the path once the transaction resolved.
    pub value: StoreValue,
}

/// Operations the session core needs from the shared store.
pub trait Substrate {
    /// Unconditionally overwrite `path`. Writing `null` deletes it.
    fn write(&self, path: &StorePath, value: StoreValue) -> Result<(), SubstrateError>;

    /// Watch `path`. The current value is delivered first, then every change,
    /// in order. Dropping the returned handle unsubscribes.
    fn subscribe(&self, path: &StorePath) -> Result<Subscription, SubstrateError>;

    /// Register a write the store performs on this connection's behalf when
    /// the connection is lost without further action from the device.
    fn write_on_disconnect(&self, path: &StorePath, value: StoreValue)
    -> Result<(), SubstrateError>;

    /// Atomically replace the value at `path` with `update(current)`.
    ///
    /// Returning `None` from `update` aborts without writing. Concurrent
    /// transactions on the same path are serialized by the store; `update`
    /// must not call back into the store.
    fn transact(
        &self,
        path: &StorePath,
        update: &mut dyn FnMut(&StoreValue) -> Option<StoreValue>,
    ) -> Result<TxOutcome, SubstrateError>;
}

/// Live feed of values for one watched path.
pub struct Subscription {
    path: StorePath,
    feed: Receiver<StoreValue>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a feed. `cancel` runs once when the handle is dropped.
    pub fn new(
        path: StorePath,
        feed: Receiver<StoreValue>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path,
            feed,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Next delivered value, if one is waiting. Never blocks.
    pub fn try_next(&self) -> Option<StoreValue> {
        self.feed.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path.to_string())
            .finish_non_exhaustive()
    }
}
