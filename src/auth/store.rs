//! Ephemeral, TTL-bound storage for OAuth2 state tokens and PKCE verifiers.
//!
//! Entries live in memory only; nothing here is ever persisted. Every
//! read-modify-write happens under one lock, so `take` is linearizable: when
//! several requests race to consume the same key, exactly one gets the value.
//!
//! Expiry is enforced twice. Each `put` schedules a removal task for that
//! entry, which bounds memory to live entries, and every read checks the
//! recorded deadline so an entry is never observable past its TTL even if the
//! removal task runs late.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::auth::pkce::random_url_safe;
use crate::types::{CodeVerifier, StateToken};

/// Default lifetime of a state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(300);

/// Default lifetime of a PKCE verifier. Longer than the state TTL: the
/// verifier is read after the state has already been validated.
pub const DEFAULT_VERIFIER_TTL: Duration = Duration::from_secs(600);

/// Random bytes behind each state token.
const STATE_BYTES: usize = 32;

/// Fallback horizon for TTLs too large to add to `Instant::now()`.
const MAX_HORIZON: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct Entry<V> {
    value: V,
    expires_at: Instant,
    /// Distinguishes re-insertions under the same key so a stale removal
    /// task cannot delete a newer entry.
    generation: u64,
}

struct Entries<V> {
    map: HashMap<String, Entry<V>>,
    next_generation: u64,
}

/// Thread-safe key/value store with per-entry expiry.
pub struct EphemeralStore<V> {
    entries: Arc<Mutex<Entries<V>>>,
}

impl<V> Clone for EphemeralStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<V: Send + 'static> Default for EphemeralStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + 'static> EphemeralStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                map: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Insert `value` under `key`, replacing any previous entry.
    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + MAX_HORIZON);

        let generation = {
            let mut entries = self.entries.lock().await;
            let generation = entries.next_generation;
            entries.next_generation = entries.next_generation.wrapping_add(1);
            entries.map.insert(
                key.clone(),
                Entry {
                    value,
                    expires_at,
                    generation,
                },
            );
            generation
        };

        self.schedule_removal(key, generation, expires_at);
    }

    /// Whether a live entry exists for `key`. Does not consume it.
    pub async fn contains(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.map.get(key) {
            Some(entry) if entry.expires_at >= now => true,
            Some(_) => {
                entries.map.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove and return the value for `key` if it is still live.
    ///
    /// Check and removal happen in one critical section.
    pub async fn take(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let entry = entries.map.remove(key)?;
        (entry.expires_at >= Instant::now()).then_some(entry.value)
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .map
            .values()
            .filter(|entry| entry.expires_at >= now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn schedule_removal(&self, key: String, generation: u64, deadline: Instant) {
        // Outside a runtime the read-side deadline check still applies.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime; entry expiry falls back to read-time checks");
            return;
        };

        let entries: Weak<Mutex<Entries<V>>> = Arc::downgrade(&self.entries);
        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let mut entries = entries.lock().await;
            if entries
                .map
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                entries.map.remove(&key);
            }
        });
    }
}

/// Set of single-use OAuth2 state tokens.
#[derive(Clone)]
pub struct StateStore {
    states: EphemeralStore<()>,
    ttl: Duration,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

impl StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: EphemeralStore::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create and remember a fresh random state token.
    pub async fn generate(&self) -> StateToken {
        let state = StateToken::new(random_url_safe(STATE_BYTES));
        self.states.put(state.as_str(), (), self.ttl).await;
        debug!("Generated OAuth2 state (ttl {:?})", self.ttl);
        state
    }

    /// Whether `state` is live, without consuming it.
    pub async fn validate(&self, state: &str) -> bool {
        self.states.contains(state).await
    }

    /// Check and invalidate `state` in one step.
    ///
    /// Returns `true` at most once per generated token, no matter how many
    /// callers race on it.
    pub async fn validate_once(&self, state: &str) -> bool {
        self.states.take(state).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.states.len().await
    }
}

/// PKCE verifiers keyed by the state token they were generated with.
#[derive(Clone)]
pub struct VerifierStore {
    verifiers: EphemeralStore<CodeVerifier>,
    ttl: Duration,
}

impl Default for VerifierStore {
    fn default() -> Self {
        Self::new(DEFAULT_VERIFIER_TTL)
    }
}

impl VerifierStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            verifiers: EphemeralStore::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn store(&self, state: &StateToken, verifier: CodeVerifier) {
        self.verifiers.put(state.as_str(), verifier, self.ttl).await;
    }

    /// Read-once: the verifier is gone after this call.
    pub async fn pop(&self, state: &str) -> Option<CodeVerifier> {
        self.verifiers.take(state).await
    }

    pub async fn len(&self) -> usize {
        self.verifiers.len().await
    }
}
