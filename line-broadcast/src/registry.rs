//! Shared set of live connections.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionId};

/// Concurrency-safe set of registered connections.
///
/// Entries are keyed by [`ConnectionId`], so snapshots come back in
/// registration order. The lock is only held for the map operation itself,
/// never across socket I/O.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn`. Registering the same connection twice is a no-op.
    pub async fn register(&self, conn: &Arc<Connection>) {
        let mut clients = self.clients.lock().await;
        clients
            .entry(conn.id())
            .or_insert_with(|| Arc::clone(conn));
    }

    /// Removes `conn`, returning whether it was present.
    pub async fn unregister(&self, conn: &Connection) -> bool {
        let mut clients = self.clients.lock().await;
        clients.remove(&conn.id()).is_some()
    }

    /// Point-in-time copy of the membership, safe to iterate while other
    /// tasks keep registering and unregistering.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let clients = self.clients.lock().await;
        clients.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
