//! Per-request sessions.
//!
//! A session is a bag of byte values keyed by string, tracked across requests
//! by a cookie-carried identifier. The pieces:
//!
//! - [`Session`]: the per-request handle. Cloning it is cheap; every clone
//!   sees the same values.
//! - [`SessionValues`]: the byte-level contract (`get` / `set`) the typed
//!   codec is built on.
//! - [`set_session`] / [`get_session`]: the typed codec: any `serde` value in,
//!   the same type back out.
//! - [`SessionStore`]: where sessions live between requests.
//!   [`MemoryStore`] keeps them in process with a sliding idle timeout.
//! - [`SessionOptions`]: cookie name, idle timeout, `HttpOnly`, essential.
//!
//! ```rust
//! use asc_web::session::{Session, get_session, set_session};
//!
//! let session = Session::new();
//! set_session(&session, "cart", &vec![1, 2, 3]).unwrap();
//! let cart: Option<Vec<i32>> = get_session(&session, "cart").unwrap();
//! assert_eq!(cart, Some(vec![1, 2, 3]));
//! ```

mod codec;
mod options;
mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use thiserror::Error;

pub use codec::{get_session, set_session};
pub use options::SessionOptions;
pub use store::{MemoryStore, SessionStore, spawn_sweeper};

/// Byte-level session contract.
///
/// Implementations use interior mutability: a request handler only ever holds
/// a shared handle to its session.
pub trait SessionValues {
    /// Returns the bytes stored under `key`, or `None` if nothing was written.
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Bytes);
}

/// Errors raised by the session codec and session stores.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session key must not be empty")]
    EmptyKey,

    #[error("session value `{key}` cannot be encoded as JSON")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session value `{key}` is not valid UTF-8")]
    NotUtf8 {
        key: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("session value `{key}` does not decode as the requested type")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session store unavailable: {0}")]
    Store(String),
}

impl SessionError {
    /// True when stored bytes exist but could not be turned back into a value.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::NotUtf8 { .. } | Self::Decode { .. })
    }
}

/// Opaque session identifier carried in the session cookie.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(String);

impl SessionId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parses a cookie value. Anything that is not 32 lowercase hex digits is
    /// rejected so a forged cookie never reaches the store.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 32
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Session handle ────────────────────────────────────────────────────────────

/// Handle to one client's session for the duration of a request.
#[derive(Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    id: Option<SessionId>,
    retired: Option<SessionId>,
    values: HashMap<String, Bytes>,
    modified: bool,
}

impl Session {
    /// A fresh, empty session with no identifier yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session loaded from a store.
    pub fn restore(id: SessionId, values: HashMap<String, Bytes>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { id: Some(id), retired: None, values, modified: false })),
        }
    }

    /// The identifier, if the session was loaded from a store or has been saved.
    pub fn id(&self) -> Option<SessionId> {
        self.lock().id.clone()
    }

    /// True if any value was written or removed during this request.
    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().values.keys().cloned().collect()
    }

    pub fn remove(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.lock();
        let removed = inner.values.remove(key);
        if removed.is_some() {
            inner.modified = true;
        }
        removed
    }

    /// Drops every value. The identifier is kept so the store entry is
    /// overwritten rather than orphaned.
    pub fn clear(&self) {
        let mut inner = self.lock();
        if !inner.values.is_empty() {
            inner.values.clear();
            inner.modified = true;
        }
    }

    /// Moves the values to a new identifier. Call on every change of
    /// privilege so an identifier handed out before sign-in cannot be used
    /// after it. The old store entry is removed when the session is saved.
    pub fn renew(&self) {
        let mut inner = self.lock();
        if let Some(old) = inner.id.take() {
            inner.retired.get_or_insert(old);
        }
        inner.modified = true;
    }

    /// The identifier given up by [`renew`](Session::renew), if any.
    pub(crate) fn take_retired(&self) -> Option<SessionId> {
        self.lock().retired.take()
    }

    /// Assigns an identifier if the session has none and returns it along with
    /// a copy of the values, ready to be written to a store.
    pub(crate) fn commit(&self) -> (SessionId, HashMap<String, Bytes>, bool) {
        let mut inner = self.lock();
        let is_new = inner.id.is_none();
        let id = inner.id.get_or_insert_with(SessionId::generate).clone();
        inner.modified = false;
        (id, inner.values.clone(), is_new)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Values are plain bytes; a panic mid-write cannot leave them torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionValues for Session {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Bytes) {
        let mut inner = self.lock();
        inner.values.insert(key.to_owned(), value);
        inner.modified = true;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Session")
            .field("id", &inner.id)
            .field("keys", &inner.values.len())
            .field("modified", &inner.modified)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_values() {
        let session = Session::new();
        let other = session.clone();
        session.set("k", Bytes::from_static(b"1"));
        assert_eq!(other.get("k"), Some(Bytes::from_static(b"1")));
        assert!(other.is_modified());
    }

    #[test]
    fn restored_session_starts_clean() {
        let id = SessionId::generate();
        let mut values = HashMap::new();
        values.insert("k".to_owned(), Bytes::from_static(b"\"v\""));
        let session = Session::restore(id.clone(), values);

        assert_eq!(session.id(), Some(id));
        assert!(!session.is_modified());
        assert!(session.contains("k"));
    }

    #[test]
    fn commit_assigns_id_once() {
        let session = Session::new();
        session.set("k", Bytes::from_static(b"1"));

        let (first, _, is_new) = session.commit();
        assert!(is_new);
        assert!(!session.is_modified());

        let (second, _, is_new) = session.commit();
        assert!(!is_new);
        assert_eq!(first, second);
    }

    #[test]
    fn renew_retires_the_old_id() {
        let id = SessionId::generate();
        let session = Session::restore(id.clone(), HashMap::new());
        session.set("k", Bytes::from_static(b"1"));

        session.renew();
        assert_eq!(session.id(), None);
        assert!(session.contains("k"));

        let (fresh, values, is_new) = session.commit();
        assert!(is_new);
        assert_ne!(fresh, id);
        assert!(values.contains_key("k"));
        assert_eq!(session.take_retired(), Some(id));
        assert_eq!(session.take_retired(), None);
    }

    #[test]
    fn remove_of_missing_key_is_not_a_modification() {
        let session = Session::new();
        assert!(session.remove("nothing").is_none());
        assert!(!session.is_modified());
    }

    #[test]
    fn session_id_rejects_forged_values() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert!(SessionId::parse("../../etc/passwd").is_none());
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse(&"Z".repeat(32)).is_none());
    }
}
