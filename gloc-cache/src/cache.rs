// SPDX-License-Identifier: AGPL-3.0-or-later
//! Last-known position cache
//!
//! Holds the most recent one-shot fix for the lifetime of the process and
//! answers `maximumAge` lookups from it.

use chrono::{DateTime, Utc};
use gloc_core::Position;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub stores: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 { 0.0 } else { self.hit_count as f64 / total as f64 }
    }
}

/// Single-slot position cache
#[derive(Debug, Default)]
pub struct PositionCache {
    last: Mutex<Option<Position>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cached fix
    pub fn store(&self, position: Position) {
        *self.last.lock() = Some(position);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Cached fix if it is no older than `maximum_age` at `now`
    ///
    /// A zero `maximum_age` never hits and is not counted as a miss.
    pub fn fresh(&self, maximum_age: Duration, now: DateTime<Utc>) -> Option<Position> {
        if maximum_age.is_zero() {
            return None;
        }

        let hit = self
            .last
            .lock()
            .as_ref()
            .filter(|p| p.is_fresh(maximum_age, now))
            .cloned();

        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    pub fn latest(&self) -> Option<Position> {
        self.last.lock().clone()
    }

    pub fn clear(&self) {
        self.last.lock().take();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}
