//! Connection lifecycle and the registry of live connections.
//!
//! The registry owns every accepted stream from the moment it is registered
//! until it is removed. Removing a connection hands ownership back to the
//! caller, and dropping it closes the socket.

use chrono::{DateTime, Utc};
use slab::Slab;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Identity of one live connection.
///
/// For sockets this is the raw file descriptor, which the OS never hands out
/// twice while the descriptor is open. It doubles as the multiplexer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub usize);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(unix)]
impl From<std::os::unix::io::RawFd> for ConnId {
    fn from(fd: std::os::unix::io::RawFd) -> Self {
        ConnId(fd as usize)
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted but not yet visible to the registry.
    Connecting,
    /// Tracked for readiness and eligible as a broadcast target.
    Registered,
    /// Terminal. The stream is closed when the connection is dropped.
    Removed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnId,
    /// Underlying stream.
    pub stream: S,
    /// Remote address, if known.
    pub peer: Option<SocketAddr>,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
    state: ConnState,
}

impl<S> Connection<S> {
    /// Create a new connection that has not been registered yet.
    pub fn new(id: ConnId, stream: S, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            stream,
            peer,
            connected_at: Utc::now(),
            state: ConnState::Connecting,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// How long the connection has been open.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this identity is already registered.
    Duplicate(ConnId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(id) => write!(f, "connection {id} is already registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Ordered registry of live connections using slab allocation.
///
/// Insertion order is the broadcast order. Lookup by identity is O(1);
/// removal is linear in the number of connections because of the order
/// vector.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    /// Slab keys in insertion order.
    order: Vec<usize>,
    by_id: HashMap<ConnId, usize>,
    /// Set on every membership change, cleared by `take_changed`.
    changed: bool,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Slab::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            by_id: HashMap::with_capacity(capacity),
            changed: false,
        }
    }

    /// Append a connection to the end of the registry.
    ///
    /// Fails with `Duplicate` if the identity is already present; the
    /// existing entry is kept and the refused connection is dropped.
    pub fn insert(&mut self, mut conn: Connection<S>) -> Result<ConnId, RegistryError> {
        let id = conn.id;
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        conn.state = ConnState::Registered;
        let key = self.connections.insert(conn);
        self.order.push(key);
        self.by_id.insert(id, key);
        self.changed = true;
        Ok(id)
    }

    /// Remove a connection, handing it back to the caller.
    ///
    /// Removing an identity that is not registered is a no-op and returns
    /// `None`.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection<S>> {
        let key = self.by_id.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|&k| k == key) {
            self.order.remove(pos);
        }
        let mut conn = self.connections.remove(key);
        conn.state = ConnState::Removed;
        self.changed = true;
        Some(conn)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection<S>> {
        self.by_id.get(&id).map(|&key| &self.connections[key])
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<S>> {
        let key = *self.by_id.get(&id)?;
        self.connections.get_mut(key)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate over connections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.order.iter().map(move |&key| &self.connections[key])
    }

    /// Visit every connection mutably, in insertion order.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Connection<S>),
    {
        for &key in &self.order {
            f(&mut self.connections[key]);
        }
    }

    /// Identities in insertion order.
    pub fn ids(&self) -> Vec<ConnId> {
        self.iter().map(Connection::id).collect()
    }

    /// Report whether membership changed since the last call, clearing the flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }

    /// Remove every connection, in insertion order.
    pub fn drain(&mut self) -> Vec<Connection<S>> {
        let ids = self.ids();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: usize) -> Connection<&'static str> {
        Connection::new(ConnId(id), "stream", None)
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut registry = ConnectionRegistry::new();
        let c = conn(3);
        assert_eq!(c.state(), ConnState::Connecting);

        registry.insert(c).unwrap();
        assert_eq!(registry.get(ConnId(3)).unwrap().state(), ConnState::Registered);

        let removed = registry.remove(ConnId(3)).unwrap();
        assert_eq!(removed.state(), ConnState::Removed);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Connection::new(ConnId(7), "first", None)).unwrap();
        registry.insert(conn(8)).unwrap();

        let err = registry
            .insert(Connection::new(ConnId(7), "second", None))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(ConnId(7)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![ConnId(7), ConnId(8)]);
        assert_eq!(registry.get(ConnId(7)).unwrap().stream, "first");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(conn(1)).unwrap();
        registry.insert(conn(2)).unwrap();
        registry.take_changed();

        assert!(registry.remove(ConnId(42)).is_none());
        assert_eq!(registry.ids(), vec![ConnId(1), ConnId(2)]);
        assert!(!registry.take_changed());

        // Removing twice is equally harmless.
        assert!(registry.remove(ConnId(1)).is_some());
        assert!(registry.remove(ConnId(1)).is_none());
        assert_eq!(registry.ids(), vec![ConnId(2)]);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut registry = ConnectionRegistry::new();
        for id in [9, 4, 12, 1, 6] {
            registry.insert(conn(id)).unwrap();
        }
        let expected: Vec<ConnId> = [9, 4, 12, 1, 6].into_iter().map(ConnId).collect();
        assert_eq!(registry.ids(), expected);

        let mut visited = Vec::new();
        registry.for_each_mut(|c| visited.push(c.id()));
        assert_eq!(visited, expected);
    }

    #[test]
    fn test_order_survives_slot_reuse() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(conn(1)).unwrap();
        registry.insert(conn(2)).unwrap();
        registry.insert(conn(3)).unwrap();

        registry.remove(ConnId(1));
        // Reuses the freed slab slot but must still go to the back.
        registry.insert(conn(4)).unwrap();

        assert_eq!(registry.ids(), vec![ConnId(2), ConnId(3), ConnId(4)]);
        let mut visited = Vec::new();
        registry.for_each_mut(|c| visited.push(c.id()));
        assert_eq!(visited, vec![ConnId(2), ConnId(3), ConnId(4)]);
    }

    #[test]
    fn test_changed_flag() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.take_changed());

        registry.insert(conn(1)).unwrap();
        assert!(registry.take_changed());
        assert!(!registry.take_changed());

        let _ = registry.insert(conn(1));
        assert!(!registry.take_changed());

        registry.remove(ConnId(1));
        assert!(registry.take_changed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain_in_order() {
        let mut registry = ConnectionRegistry::new();
        for id in [5, 3, 8] {
            registry.insert(conn(id)).unwrap();
        }
        let drained: Vec<ConnId> = registry.drain().iter().map(Connection::id).collect();
        assert_eq!(drained, vec![ConnId(5), ConnId(3), ConnId(8)]);
        assert!(registry.is_empty());
    }
}
