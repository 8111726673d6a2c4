//! Authenticated sessions and pending authorization requests.

use super::idp::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long an authorization request may stay unanswered.
pub const STATE_TTL: Duration = Duration::from_secs(15 * 60);

/// An authenticated user session.
#[derive(Debug)]
pub struct Session {
    /// The identity it was created for.
    pub identity: Identity,
    expires_at: Instant,
}

impl Session {
    /// Get the expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Sessions kept per authenticate action before the oldest are evicted.
pub const MAX_SESSIONS: usize = 100_000;

/// Pending authorization requests kept before the oldest are evicted.
pub const MAX_PENDING_AUTHORIZATIONS: usize = 10_000;

/// Token-keyed entries with a fixed lifetime, bounded in size.
///
/// Every entry lives for the same duration, so insertion order is expiry
/// order and `order` can be pruned from the front.
#[derive(Debug)]
struct ExpiringTable<V> {
    entries: HashMap<String, (V, Instant)>,
    order: VecDeque<(String, Instant)>,
    capacity: usize,
}

impl<V> ExpiringTable<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, key: String, value: V, expires_at: Instant, now: Instant) {
        while let Some((_, expires)) = self.order.front() {
            if *expires > now {
                break;
            }
            self.pop_oldest();
        }
        while self.order.len() >= self.capacity {
            self.pop_oldest();
        }

        self.order.push_back((key.clone(), expires_at));
        self.entries.insert(key, (value, expires_at));
    }

    fn pop_oldest(&mut self) {
        if let Some((key, _)) = self.order.pop_front() {
            self.entries.remove(&key);
        }
    }
}

/// In-memory sessions keyed by an opaque cookie token.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<ExpiringTable<Arc<Session>>>,
    timeout: Duration,
}

impl SessionStore {
    /// Create a store whose sessions last `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_capacity(timeout, MAX_SESSIONS)
    }

    /// Create a store holding at most `capacity` sessions. Past that, the
    /// oldest session is evicted.
    #[must_use]
    pub fn with_capacity(timeout: Duration, capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(ExpiringTable::new(capacity)),
            timeout,
        }
    }

    /// Get the session lifetime.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a session and return its token.
    pub fn create(&self, identity: Identity, now: Instant) -> String {
        let token = random_token();
        let expires_at = now + self.timeout;
        let session = Arc::new(Session {
            identity,
            expires_at,
        });

        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(token.clone(), session, expires_at, now);
        token
    }

    /// Look up a live session. Expired sessions are dropped.
    pub fn get(&self, token: &str, now: Instant) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        match sessions.entries.get(token) {
            Some((session, _)) if session.expires_at > now => Some(Arc::clone(session)),
            Some(_) => {
                sessions.entries.remove(token);
                None
            },
            None => None,
        }
    }

    /// Get the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .entries
            .len()
    }

    /// Check if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Authorization requests waiting for the identity provider callback,
/// keyed by the `state` parameter.
#[derive(Debug)]
pub struct PendingAuthorizations {
    states: Mutex<ExpiringTable<String>>,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::with_capacity(MAX_PENDING_AUTHORIZATIONS)
    }
}

impl PendingAuthorizations {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding at most `capacity` requests. Past that, the
    /// oldest request is forgotten and its callback will be rejected.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: Mutex::new(ExpiringTable::new(capacity)),
        }
    }

    /// Remember where to send the client after login. Returns the state.
    pub fn issue(&self, return_to: String, now: Instant) -> String {
        let state = random_token();
        self.states
            .lock()
            .expect("state lock poisoned")
            .insert(state.clone(), return_to, now + STATE_TTL, now);
        state
    }

    /// Consume a state. Returns the original URL if the state is known and
    /// not expired.
    pub fn redeem(&self, state: &str, now: Instant) -> Option<String> {
        let (return_to, expires) = self
            .states
            .lock()
            .expect("state lock poisoned")
            .entries
            .remove(state)?;
        (expires > now).then_some(return_to)
    }

    /// Get the number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().expect("state lock poisoned").entries.len()
    }

    /// Check if no requests are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
