//! Process-wide firing throttle.
//!
//! Entries map `(namespace, key)` to the instant the key last fired. The
//! namespace is a playbook id, so throttling survives reloads for as long
//! as the playbook definition is unchanged.

use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

/// Number of independently locked shards.
const SHARDS: usize = 16;

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Used by tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

type Shard = Mutex<HashMap<(String, String), Instant>>;

/// Snapshot of one rate limiter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Namespace (playbook id).
    pub namespace: String,
    /// Discriminating key within the namespace.
    pub key: String,
    /// Time since the key last fired.
    pub age: Duration,
}

/// Striped-lock rate limiter with an atomic check-and-mark primitive.
pub struct RateLimiter {
    shards: Vec<Shard>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("entries", &self.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a rate limiter using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a rate limiter with a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
        }
    }

    fn shard(&self, namespace: &str, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        namespace.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Returns true and marks the key if it has not fired within `window`.
    ///
    /// The check and the mark happen under one shard lock, so concurrent
    /// callers for the same key observe at most one `true` per window. A
    /// zero window never throttles.
    pub fn mark_and_test(&self, namespace: &str, key: &str, window: Duration) -> bool {
        let now = self.clock.now();
        if window.is_zero() {
            return true;
        }

        let mut shard = self.shard(namespace, key).lock();
        let entry_key = (namespace.to_string(), key.to_string());
        match shard.get(&entry_key) {
            Some(last) if now.saturating_duration_since(*last) < window => {
                trace!(namespace, key, "rate limiter rejected");
                false
            }
            _ => {
                shard.insert(entry_key, now);
                true
            }
        }
    }

    /// Drops entries older than `max_age`. Returns how many were removed.
    pub fn purge_expired(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, last| now.saturating_duration_since(*last) < max_age);
            removed += before - shard.len();
        }
        removed
    }

    /// Returns a snapshot of every entry, sorted by namespace then key.
    #[must_use]
    pub fn entries(&self) -> Vec<RateLimitEntry> {
        let now = self.clock.now();
        let mut entries: Vec<RateLimitEntry> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .iter()
                    .map(|((namespace, key), last)| RateLimitEntry {
                        namespace: namespace.clone(),
                        key: key.clone(),
                        age: now.saturating_duration_since(*last),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| (&a.namespace, &a.key).cmp(&(&b.namespace, &b.key)));
        entries
    }

    /// Returns the number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns true if no entries are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
