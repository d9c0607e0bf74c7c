//! Registry of connected clients.
//!
//! The registry is the only shared mutable state in the service. One mutex
//! guards registration, removal and membership snapshots; sends always
//! happen on a snapshot, outside the lock, so a stalled client can never
//! block other clients from joining or leaving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::ClientSink;

/// Registry-assigned client identity. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A registered client, as handed out by [`ClientRegistry::snapshot_members`].
pub type Member = (ClientId, Arc<dyn ClientSink>);

struct Inner {
    next_id: u64,
    clients: HashMap<ClientId, Arc<dyn ClientSink>>,
}

/// Thread-safe set of active clients.
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                clients: HashMap::new(),
            }),
        }
    }

    /// Add a client and return its identity.
    pub fn register(&self, client: Arc<dyn ClientSink>) -> ClientId {
        let mut inner = self.inner.lock();
        let id = ClientId(inner.next_id);
        inner.next_id += 1;
        inner.clients.insert(id, client);
        debug!(client = %id, clients = inner.clients.len(), "Client registered");
        id
    }

    /// Remove a client.
    ///
    /// Returns `false` if it was already gone; removing twice is harmless.
    pub fn unregister(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.clients.remove(&id).is_some();
        if removed {
            debug!(client = %id, clients = inner.clients.len(), "Client unregistered");
        }
        removed
    }

    /// Point-in-time copy of the membership.
    pub fn snapshot_members(&self) -> Vec<Member> {
        self.inner
            .lock()
            .clients
            .iter()
            .map(|(id, client)| (*id, Arc::clone(client)))
            .collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.lock().clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().clients.is_empty()
    }

    /// Close every registered client.
    ///
    /// Membership is left alone: each connection handler unregisters its
    /// own client once the transport winds down.
    pub async fn close_all(&self) {
        let members = self.snapshot_members();
        if members.is_empty() {
            return;
        }
        debug!(clients = members.len(), "Closing all clients");
        join_all(members.iter().map(|(_, client)| client.close())).await;
    }
}
