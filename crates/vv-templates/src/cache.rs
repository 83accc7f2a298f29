// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable template cache eviction (§4.5). Process-local, read-mostly,
//! guarded by a `tokio::sync::RwLock` per §5's shared-resource note.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Eviction policy selectable for a [`TemplateCache`].
#[derive(Debug, Clone, Copy)]
pub enum EvictionPolicy {
    /// Evict the least-recently-used entry.
    Lru,
    /// Evict the least-frequently-used entry.
    Lfu,
    /// Evict the entry inserted earliest (insertion order).
    Fifo,
    /// Evict entries once `ttl` has elapsed since insertion, regardless of use.
    Ttl(Duration),
}

struct Entry {
    value: String,
    inserted_at: Instant,
    last_used_at: Instant,
    uses: u64,
    sequence: u64,
}

/// A bounded cache of rendered/loaded template bodies keyed by `(type, version)`.
pub struct TemplateCache {
    policy: EvictionPolicy,
    capacity: usize,
    entries: HashMap<(String, String), Entry>,
    next_sequence: u64,
}

impl TemplateCache {
    /// Construct an empty cache with the given policy and maximum size.
    #[must_use]
    pub fn new(policy: EvictionPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Fetch a cached value, recording use for LRU/LFU accounting.
    ///
    /// Under [`EvictionPolicy::Ttl`], an entry older than the configured
    /// duration is treated as a miss and removed.
    pub fn get(&mut self, kind: &str, version: &str) -> Option<String> {
        let key = (kind.to_string(), version.to_string());
        if let EvictionPolicy::Ttl(ttl) = self.policy {
            if let Some(entry) = self.entries.get(&key) {
                if entry.inserted_at.elapsed() > ttl {
                    self.entries.remove(&key);
                    return None;
                }
            }
        }
        let entry = self.entries.get_mut(&key)?;
        entry.uses += 1;
        entry.last_used_at = Instant::now();
        Some(entry.value.clone())
    }

    /// Insert or replace a cached value, evicting per [`EvictionPolicy`] if
    /// the cache is at capacity.
    pub fn put(&mut self, kind: &str, version: &str, value: String) {
        let key = (kind.to_string(), version.to_string());
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        let now = Instant::now();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_used_at: now,
                uses: 0,
                sequence,
            },
        );
    }

    fn evict_one(&mut self) {
        let victim = match self.policy {
            EvictionPolicy::Lru => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used_at)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.uses)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo | EvictionPolicy::Ttl(_) => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.sequence)
                .map(|(k, _)| k.clone()),
        };
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
