//! Bounded, Time-Windowed Deduplication Cache
//!
//! ## Overview
//!
//! Devices on lossy links retransmit. The same `(metric, ts)` reading can show
//! up several times within seconds, and downstream storage should see it once.
//! This cache remembers which keys were forwarded recently and answers a
//! single question: "has this one been seen inside the window?"
//!
//! ## Design Rationale
//!
//! ### Two Eviction Rules
//!
//! - **Age**: an entry older than the TTL is forgotten before every lookup, so
//!   an expired key never counts as a duplicate.
//! - **Size**: after an insert pushes the cache past its capacity, the single
//!   oldest-inserted entry is evicted.
//!
//! ### Insertion Order, Not Access Order
//!
//! A duplicate hit does not refresh its entry. Lookups only ever ask "is it
//! present", so recency of access carries no information; what matters is
//! how long ago the reading was first forwarded.
//!
//! ```text
//! capacity = 3, ttl = 300s
//!
//! t=0    temperature:A  -> new        [A]
//! t=1    temperature:B  -> new        [A, B]
//! t=2    temperature:A  -> duplicate  [A, B]        (A keeps inserted_at = 0)
//! t=3    humidity:A     -> new        [A, B, hA]
//! t=4    temperature:C  -> new        [B, hA, C]    (A evicted: oldest insert)
//! t=5    temperature:A  -> new        [hA, C, A]    (B evicted)
//! ```
//!
//! ### Data Layout
//!
//! Entries live in a `VecDeque` in insertion order, mirrored by a `HashSet` for
//! O(1) membership. Because insertion times never decrease (see below), expired
//! entries always form a prefix of the queue and the age sweep only pops from
//! the front.
//!
//! ### Clock Steps
//!
//! The clock reading is clamped to the largest value seen so far. A source that
//! steps backwards therefore makes entries look younger, never reorders them.
//!
//! ## Usage Example
//!
//! ```rust
//! use envgate_core::{DedupCache, DedupConfig, Metric};
//! use envgate_core::time::FixedTime;
//!
//! let clock = FixedTime::new(0);
//! let mut cache = DedupCache::new(DedupConfig::new(1000, 300.0)?, clock.clone());
//!
//! assert!(!cache.is_duplicate(Metric::Temperature, "2024-01-01T00:00:00"));
//! assert!(cache.is_duplicate(Metric::Temperature, "2024-01-01T00:00:00"));
//!
//! // Different metric, same timestamp: distinct reading
//! assert!(!cache.is_duplicate(Metric::Humidity, "2024-01-01T00:00:00"));
//!
//! // Past the window the key is new again
//! clock.advance(300_001);
//! assert!(!cache.is_duplicate(Metric::Temperature, "2024-01-01T00:00:00"));
//! # Ok::<(), envgate_core::ConfigError>(())
//! ```

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::config::DedupConfig;
use crate::metric::Metric;
use crate::time::{MonotonicTime, TimeSource, Timestamp};

/// One remembered reading
#[derive(Debug, Clone, PartialEq, Eq)]
struct DedupEntry {
    key: String,
    inserted_at: Timestamp,
}

/// Seen-before set keyed by `"<metric>:<ts>"`
///
/// ## Internal Invariants
///
/// - `entries` and `keys` always hold the same key set
/// - `entries` is ordered by `inserted_at`, oldest first
/// - `entries.len() <= capacity` between calls
///
/// ## Thread Safety
///
/// Not synchronized. The pipeline owns it and calls it from one task.
#[derive(Debug)]
pub struct DedupCache<C: TimeSource = MonotonicTime> {
    capacity: usize,
    ttl_ms: u64,
    entries: VecDeque<DedupEntry>,
    keys: HashSet<String>,
    clock: C,
    last_now: Timestamp,
}

impl<C: TimeSource> DedupCache<C> {
    /// Create an empty cache reading time from `clock`
    pub fn new(config: DedupConfig, clock: C) -> Self {
        Self {
            capacity: config.capacity(),
            ttl_ms: duration_to_ms(config.ttl()),
            entries: VecDeque::with_capacity(config.capacity().min(4096) + 1),
            keys: HashSet::new(),
            clock,
            last_now: 0,
        }
    }

    /// Check `(metric, ts)` against the window, recording it if new
    ///
    /// Returns `true` when the key was already present. A duplicate hit does not
    /// touch the cache.
    pub fn is_duplicate(&mut self, metric: Metric, ts: &str) -> bool {
        let now = self.clock.now();
        self.is_duplicate_at(metric, ts, now)
    }

    /// [`is_duplicate`](Self::is_duplicate) at an explicit clock reading
    pub fn is_duplicate_at(&mut self, metric: Metric, ts: &str, now: Timestamp) -> bool {
        let now = now.max(self.last_now);
        self.last_now = now;

        self.evict_expired(now);

        let key = dedup_key(metric, ts);
        if self.keys.contains(&key) {
            return true;
        }

        self.keys.insert(key.clone());
        self.entries.push_back(DedupEntry {
            key,
            inserted_at: now,
        });

        // Each call adds at most one entry, so one eviction is always enough
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }

        false
    }

    /// Whether the key is currently held, ignoring expiry
    pub fn contains(&self, metric: Metric, ts: &str) -> bool {
        self.keys.contains(&dedup_key(metric, ts))
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of keys held at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dedup window
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    fn evict_expired(&mut self, now: Timestamp) {
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.inserted_at) <= self.ttl_ms {
                break;
            }
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.keys.remove(&entry.key);
        }
    }
}

/// `"<metric>:<ts>"`
pub fn dedup_key(metric: Metric, ts: &str) -> String {
    format!("{}:{}", metric.name(), ts)
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
