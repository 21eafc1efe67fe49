//! Time-bounded result cache for service enumeration commands.
//!
//! Panels poll `manage.py --get-services` far more often than the answer
//! changes. Results of that command family are kept for a TTL and served
//! without spawning a process. The map is a bounded LRU so that a panel
//! sending many distinct working directories cannot grow it without limit.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use warlock_protocol::CommandOutput;

/// Marker substrings identifying the cacheable command family.
const CACHEABLE_MARKERS: [&str; 2] = ["manage.py", "--get-services"];

struct CacheEntry {
    output: CommandOutput,
    stored_at: Instant,
}

/// LRU map of command results with TTL staleness.
pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` results (minimum one),
    /// each fresh for `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Whether `command` belongs to the cacheable family.
    #[must_use]
    pub fn is_cacheable(command: &str) -> bool {
        CACHEABLE_MARKERS
            .iter()
            .all(|marker| command.contains(marker))
    }

    /// Composite key of working directory and command text.
    #[must_use]
    pub fn key(working_dir: Option<&str>, command: &str) -> String {
        format!("{}::{command}", working_dir.unwrap_or_default())
    }

    /// Fresh result stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<CommandOutput> {
        self.get_at(key, Instant::now())
    }

    /// Store `output` under `key`, replacing any previous entry.
    pub fn insert(&self, key: String, output: CommandOutput) {
        self.insert_at(key, output, Instant::now());
    }

    /// Number of stored entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<CommandOutput> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.stored_at) < self.ttl {
            Some(entry.output.clone())
        } else {
            None
        }
    }

    fn insert_at(&self, key: String, output: CommandOutput, now: Instant) {
        self.lock().put(
            key,
            CacheEntry {
                output,
                stored_at: now,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        // Entries are plain data; a panic mid-insert cannot leave them torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
