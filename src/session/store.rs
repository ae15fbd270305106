//! Session persistence between requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, warn};

use super::{SessionError, SessionId};
use crate::handler::BoxFuture;

/// Where sessions live between requests.
///
/// `save` refreshes the idle deadline: a session expires `idle_timeout` after
/// its most recent save, not after its creation.
pub trait SessionStore: Send + Sync + 'static {
    fn load<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<HashMap<String, Bytes>>, SessionError>>;

    fn save<'a>(
        &'a self,
        id: &'a SessionId,
        values: HashMap<String, Bytes>,
        idle_timeout: Duration,
    ) -> BoxFuture<'a, Result<(), SessionError>>;

    fn remove<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<(), SessionError>>;

    /// Drops every expired session and returns how many went. Stores that
    /// expire entries on their own keep the default.
    fn purge(&self) -> BoxFuture<'_, Result<usize, SessionError>> {
        Box::pin(async { Ok(0) })
    }
}

/// Spawns a background task that purges `store` every `every`.
///
/// Sessions that are never loaded again would otherwise stay in the store
/// forever. Abort the returned handle to stop sweeping.
pub fn spawn_sweeper(store: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            match store.purge().await {
                Ok(0) => {}
                Ok(n) => debug!(purged = n, "expired sessions purged"),
                Err(e) => warn!(error = %e, "session purge failed"),
            }
        }
    })
}

/// In-process session store.
///
/// Expired sessions are dropped lazily on load, or in bulk by
/// [`purge_expired`](MemoryStore::purge_expired), which [`spawn_sweeper`]
/// runs periodically.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

struct Entry {
    values: HashMap<String, Bytes>,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every expired session and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemoryStore {
    fn load<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<HashMap<String, Bytes>>, SessionError>> {
        Box::pin(async move {
            let mut sessions = self.lock();
            let expired = match sessions.get(id) {
                None => return Ok(None),
                Some(entry) => entry.expires_at <= Instant::now(),
            };
            if expired {
                sessions.remove(id);
                return Ok(None);
            }
            Ok(sessions.get(id).map(|entry| entry.values.clone()))
        })
    }

    fn save<'a>(
        &'a self,
        id: &'a SessionId,
        values: HashMap<String, Bytes>,
        idle_timeout: Duration,
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            let Some(expires_at) = Instant::now().checked_add(idle_timeout) else {
                return Err(SessionError::Store(format!("idle timeout {idle_timeout:?} is out of range")));
            };
            self.lock().insert(id.clone(), Entry { values, expires_at });
            Ok(())
        })
    }

    fn remove<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            self.lock().remove(id);
            Ok(())
        })
    }

    fn purge(&self) -> BoxFuture<'_, Result<usize, SessionError>> {
        Box::pin(async move { Ok(self.purge_expired()) })
    }
}
