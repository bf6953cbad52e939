use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::limits::*;
use crate::model::Appointment;

struct CachedCreate {
    appointment: Appointment,
    stored_at: Instant,
}

/// Remembers the outcome of successful creates by caller-chosen key, so a
/// retried request gets the original appointment back instead of a conflict.
/// Consulted by the protocol layer; the engine itself never deduplicates.
pub struct IdempotencyCache {
    entries: DashMap<String, CachedCreate>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Appointment> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.appointment.clone())
    }

    /// Returns false when the key is too long or the cache is full.
    pub fn insert(&self, key: &str, appointment: &Appointment) -> bool {
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return false;
        }
        if self.entries.len() >= MAX_IDEMPOTENCY_ENTRIES && !self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(
            key.to_string(),
            CachedCreate {
                appointment: appointment.clone(),
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
