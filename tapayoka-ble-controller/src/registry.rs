//! Connection cache: at most one live connection per endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Result;
use crate::connection::Connection;

type OpenLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    // Serializes opens per endpoint, never across endpoints
    opening: Mutex<HashMap<String, OpenLock>>,
    opened: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, endpoint: &str) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .get(endpoint)
            .filter(|connection| connection.is_open())
            .cloned()
    }

    /// Reuse the cached connection while it is open, otherwise open a new one
    ///
    /// A new connection is cached only after its handshake completes. A failed
    /// open drops any stale entry for the endpoint. A slow handshake only
    /// holds up callers of the same endpoint.
    pub async fn get_or_create(&self, endpoint: &str) -> Result<Arc<Connection>> {
        if let Some(connection) = self.cached(endpoint) {
            return Ok(connection);
        }

        let open_lock = lock(&self.opening)
            .entry(endpoint.to_string())
            .or_default()
            .clone();
        let _opening = open_lock.lock().await;

        // Someone else may have opened it while we waited
        if let Some(connection) = self.cached(endpoint) {
            return Ok(connection);
        }
        tracing::debug!(endpoint, "opening connection");

        match Connection::open(endpoint).await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                self.opened.fetch_add(1, Ordering::Relaxed);
                lock(&self.connections).insert(endpoint.to_string(), connection.clone());
                Ok(connection)
            }
            Err(e) => {
                lock(&self.connections).remove(endpoint);
                Err(e)
            }
        }
    }

    /// Connections opened over the registry's lifetime
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Cached entries, including ones that closed and await replacement
    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
