//! In-process store with per-device connections.
//!
//! `MemoryStore` is the shared backend; each device gets its own
//! `MemoryConnection`. Connections can be taken offline and back online to
//! exercise presence and election without a real network.
//!
//! Semantics:
//! - Subscribers get the current value on subscribe, then every change.
//!   Re-writing an identical value is not redelivered.
//! - An offline connection receives nothing except its own
//!   `.info/connected` flag. On reconnect it receives whatever changed.
//! - Going offline (or dropping the connection) fires its deferred writes
//!   once, in registration order.
//! - Writes and transactions from an offline connection fail with
//!   [`SubstrateError::Offline`].

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use scorepad_wire::StorePath;
use serde_json::{Map, Value};

use crate::substrate::{StoreValue, Subscription, Substrate, SubstrateError, TxOutcome};

type ConnectionId = u64;
type SubscriberId = u64;

// ============================================================================
// Backend
// ============================================================================

struct Subscriber {
    id: SubscriberId,
    connection: ConnectionId,
    path: StorePath,
    feed: mpsc::Sender<StoreValue>,
    delivered: Option<StoreValue>,
}

#[derive(Default)]
struct ConnectionState {
    online: bool,
    deferred: Vec<(StorePath, StoreValue)>,
}

#[derive(Default)]
struct Backend {
    root: StoreValue,
    connections: HashMap<ConnectionId, ConnectionState>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl Backend {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_online(&self, connection: ConnectionId) -> bool {
        self.connections.get(&connection).is_some_and(|c| c.online)
    }

    fn ensure_online(&self, connection: ConnectionId) -> Result<(), SubstrateError> {
        if self.is_online(connection) {
            Ok(())
        } else {
            Err(SubstrateError::Offline)
        }
    }

    fn value_for(&self, connection: ConnectionId, path: &StorePath) -> StoreValue {
        if path.is_connected_flag() {
            return Value::Bool(self.is_online(connection));
        }
        read_at(&self.root, path.segments())
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn apply(&mut self, path: &StorePath, value: StoreValue) {
        let value = if is_empty_node(&value) {
            Value::Null
        } else {
            value
        };
        write_at(&mut self.root, path.segments(), value);
    }

    /// Push the current value to every subscriber whose view changed.
    fn notify(&mut self) {
        let pending: Vec<(usize, StoreValue)> = self
            .subscribers
            .iter()
            .enumerate()
            .filter_map(|(index, sub)| {
                if !self.is_online(sub.connection) && !sub.path.is_connected_flag() {
                    return None;
                }
                let value = self.value_for(sub.connection, &sub.path);
                (sub.delivered.as_ref() != Some(&value)).then_some((index, value))
            })
            .collect();

        let mut closed = Vec::new();
        for (index, value) in pending {
            let sub = &mut self.subscribers[index];
            if sub.feed.send(value.clone()).is_ok() {
                sub.delivered = Some(value);
            } else {
                closed.push(sub.id);
            }
        }
        if !closed.is_empty() {
            self.subscribers.retain(|s| !closed.contains(&s.id));
        }
    }

    fn go_offline(&mut self, connection: ConnectionId) {
        let Some(state) = self.connections.get_mut(&connection) else {
            return;
        };
        if !state.online {
            return;
        }
        state.online = false;
        let deferred = std::mem::take(&mut state.deferred);
        debug!(
            "connection {connection} offline, firing {} deferred write(s)",
            deferred.len()
        );
        for (path, value) in deferred {
            self.apply(&path, value);
        }
        self.notify();
    }
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn read_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| child(node, segment))
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Set `segments` under `node`. Writing null removes the key and prunes
/// parents left empty.
fn write_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Value::Object(map) = node {
            if rest.is_empty() {
                map.remove(head);
            } else if let Some(next) = map.get_mut(head) {
                write_at(next, rest, value);
                if is_empty_node(next) {
                    map.remove(head);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let next = map.entry(head.clone()).or_insert(Value::Null);
        write_at(next, rest, value);
    }
}

// ============================================================================
// Store
// ============================================================================

/// Shared backend. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    backend: Arc<Mutex<Backend>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Backend>, SubstrateError> {
        self.backend.lock().map_err(|_| SubstrateError::Poisoned)
    }

    /// Open a new, online connection.
    pub fn connect(&self) -> Result<MemoryConnection, SubstrateError> {
        let mut backend = self.lock()?;
        let id = backend.next_id();
        backend.connections.insert(
            id,
            ConnectionState {
                online: true,
                deferred: Vec::new(),
            },
        );
        Ok(MemoryConnection {
            store: self.clone(),
            id,
        })
    }

    /// Read the authoritative value at `path`, bypassing any connection.
    pub fn read(&self, path: &StorePath) -> Result<StoreValue, SubstrateError> {
        let backend = self.lock()?;
        Ok(read_at(&backend.root, path.segments())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One device's view of a [`MemoryStore`].
///
/// Dropping a connection counts as an ungraceful disconnect.
pub struct MemoryConnection {
    store: MemoryStore,
    id: ConnectionId,
}

impl MemoryConnection {
    pub fn is_online(&self) -> bool {
        self.store
            .lock()
            .map(|backend| backend.is_online(self.id))
            .unwrap_or(false)
    }

    /// Drop the link. Deferred writes fire and remote delivery stops.
    pub fn disconnect(&self) -> Result<(), SubstrateError> {
        let mut backend = self.store.lock()?;
        backend.go_offline(self.id);
        Ok(())
    }

    /// Restore the link and deliver whatever changed while offline.
    pub fn reconnect(&self) -> Result<(), SubstrateError> {
        let mut backend = self.store.lock()?;
        if let Some(state) = backend.connections.get_mut(&self.id) {
            state.online = true;
        }
        backend.notify();
        Ok(())
    }
}

impl Substrate for MemoryConnection {
    fn write(&self, path: &StorePath, value: StoreValue) -> Result<(), SubstrateError> {
        let mut backend = self.store.lock()?;
        backend.ensure_online(self.id)?;
        backend.apply(path, value);
        backend.notify();
        Ok(())
    }

    fn subscribe(&self, path: &StorePath) -> Result<Subscription, SubstrateError> {
        let (sender, receiver) = mpsc::channel();
        let id = {
            let mut backend = self.store.lock()?;
            let id = backend.next_id();
            backend.subscribers.push(Subscriber {
                id,
                connection: self.id,
                path: path.clone(),
                feed: sender,
                delivered: None,
            });
            backend.notify();
            id
        };

        let backend = Arc::clone(&self.store.backend);
        Ok(Subscription::new(path.clone(), receiver, move || {
            if let Ok(mut backend) = backend.lock() {
                backend.subscribers.retain(|s| s.id != id);
            }
        }))
    }

    fn write_on_disconnect(
        &self,
        path: &StorePath,
        value: StoreValue,
    ) -> Result<(), SubstrateError> {
        let mut backend = self.store.lock()?;
        backend.ensure_online(self.id)?;
        if let Some(state) = backend.connections.get_mut(&self.id) {
            state.deferred.push((path.clone(), value));
        }
        Ok(())
    }

    fn transact(
        &self,
        path: &StorePath,
        update: &mut dyn FnMut(&StoreValue) -> Option<StoreValue>,
    ) -> Result<TxOutcome, SubstrateError> {
        let mut backend = self.store.lock()?;
        backend.ensure_online(self.id)?;
        let current = read_at(&backend.root, path.segments())
            .cloned()
            .unwrap_or(Value::Null);

        match update(&current) {
            Some(next) => {
                backend.apply(path, next.clone());
                backend.notify();
                Ok(TxOutcome {
                    committed: true,
                    value: next,
                })
            }
            None => Ok(TxOutcome {
                committed: false,
                value: current,
            }),
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        match self.store.lock() {
            Ok(mut backend) => {
                backend.go_offline(self.id);
                backend.connections.remove(&self.id);
                let id = self.id;
                backend.subscribers.retain(|s| s.connection != id);
            }
            Err(err) => warn!("connection {} dropped without cleanup: {err}", self.id),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> StorePath {
        StorePath::parse(p)
    }

    fn drain(sub: &Subscription) -> Vec<StoreValue> {
        std::iter::from_fn(|| sub.try_next()).collect()
    }

    #[test]
    fn test_subscribe_delivers_current_then_changes() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        conn.write(&path("games/abc/hostId"), json!("d1")).unwrap();

        let sub = conn.subscribe(&path("games/abc")).unwrap();
        assert_eq!(drain(&sub), vec![json!({"hostId": "d1"})]);

        conn.write(&path("games/abc/pointsLimit"), json!(50)).unwrap();
        assert_eq!(
            drain(&sub),
            vec![json!({"hostId": "d1", "pointsLimit": 50})]
        );
    }

    #[test]
    fn test_identical_write_not_redelivered() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let sub = conn.subscribe(&path("games/abc")).unwrap();
        assert_eq!(drain(&sub), vec![Value::Null]);

        conn.write(&path("games/abc/hostId"), json!("d1")).unwrap();
        conn.write(&path("games/abc/hostId"), json!("d1")).unwrap();
        assert_eq!(drain(&sub).len(), 1);
    }

    #[test]
    fn test_unrelated_write_not_delivered() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let sub = conn.subscribe(&path("games/abc")).unwrap();
        drain(&sub);

        conn.write(&path("games/zzz/hostId"), json!("d1")).unwrap();
        assert!(drain(&sub).is_empty());
    }

    #[test]
    fn test_null_write_prunes_empty_parents() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        conn.write(&path("games/abc/clients/d1/online"), json!(true))
            .unwrap();
        conn.write(&path("games/abc/clients/d1/online"), Value::Null)
            .unwrap();
        assert_eq!(store.read(&path("games/abc")).unwrap(), Value::Null);
    }

    #[test]
    fn test_empty_array_stored_as_absent() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        conn.write(&path("games/abc/players"), json!([{"id": "p"}]))
            .unwrap();
        conn.write(&path("games/abc/players"), json!([])).unwrap();
        assert_eq!(store.read(&path("games/abc/players")).unwrap(), Value::Null);
    }

    #[test]
    fn test_transaction_commit_and_abort() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let host = path("games/abc/hostId");

        let outcome = conn
            .transact(&host, &mut |current| {
                assert!(current.is_null());
                Some(json!("d1"))
            })
            .unwrap();
        assert!(outcome.committed);
        assert_eq!(outcome.value, json!("d1"));

        let outcome = conn.transact(&host, &mut |_| None).unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.value, json!("d1"));
    }

    #[test]
    fn test_disconnect_fires_deferred_writes() {
        let store = MemoryStore::new();
        let device = store.connect().unwrap();
        let observer = store.connect().unwrap();
        let online = path("games/abc/clients/d1/online");

        device.write_on_disconnect(&online, json!(false)).unwrap();
        device.write(&online, json!(true)).unwrap();

        let sub = observer.subscribe(&online).unwrap();
        assert_eq!(drain(&sub), vec![json!(true)]);

        device.disconnect().unwrap();
        assert_eq!(drain(&sub), vec![json!(false)]);
        assert!(!device.is_online());
    }

    #[test]
    fn test_dropping_connection_fires_deferred_writes() {
        let store = MemoryStore::new();
        let online = path("games/abc/clients/d1/online");
        {
            let device = store.connect().unwrap();
            device.write_on_disconnect(&online, json!(false)).unwrap();
            device.write(&online, json!(true)).unwrap();
        }
        assert_eq!(store.read(&online).unwrap(), json!(false));
    }

    #[test]
    fn test_offline_connection_rejects_writes() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        conn.disconnect().unwrap();
        let host = path("games/abc/hostId");

        assert_eq!(conn.write(&host, json!("d1")), Err(SubstrateError::Offline));
        assert_eq!(
            conn.transact(&host, &mut |_| Some(json!("d1"))),
            Err(SubstrateError::Offline)
        );
    }

    #[test]
    fn test_connected_flag_follows_connection() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let sub = conn.subscribe(&StorePath::connected()).unwrap();
        assert_eq!(drain(&sub), vec![json!(true)]);

        conn.disconnect().unwrap();
        assert_eq!(drain(&sub), vec![json!(false)]);

        conn.reconnect().unwrap();
        assert_eq!(drain(&sub), vec![json!(true)]);
    }

    #[test]
    fn test_offline_subscriber_catches_up_on_reconnect() {
        let store = MemoryStore::new();
        let writer = store.connect().unwrap();
        let reader = store.connect().unwrap();
        let host = path("games/abc/hostId");
        let sub = reader.subscribe(&host).unwrap();
        drain(&sub);

        reader.disconnect().unwrap();
        writer.write(&host, json!("a")).unwrap();
        writer.write(&host, json!("b")).unwrap();
        assert!(drain(&sub).is_empty());

        reader.reconnect().unwrap();
        assert_eq!(drain(&sub), vec![json!("b")]);
    }

    #[test]
    fn test_dropped_subscription_unsubscribes() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let sub = conn.subscribe(&path("games/abc")).unwrap();
        drop(sub);
        let backend = store.lock().unwrap();
        assert!(backend.subscribers.is_empty());
    }
}
