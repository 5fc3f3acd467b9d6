//! Process-wide registry of online users.
//!
//! One entry per username behind a single coarse `RwLock`. Expected entry
//! counts are small, so per-key locking buys nothing. The lock is never
//! held across I/O.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{Identity, PresenceEntry};

#[derive(Debug, Clone)]
struct Slot {
    entry: PresenceEntry,
    /// Stamped from the store-wide counter on every upsert. Eviction deletes
    /// only when the revision it scanned is still current.
    revision: u64,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_revision: u64,
}

/// Registry mapping username to [`PresenceEntry`].
///
/// Cheap to share behind an `Arc`; independent instances do not interact.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The map holds plain data and no invariant spans a panic, so a
    // poisoned lock is safe to keep using.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the entry for `identity.username`, stamping
    /// `last_seen` with the current time.
    ///
    /// Returns `true` if the username was not present before.
    pub fn upsert(&self, identity: Identity) -> bool {
        self.upsert_at(identity, Utc::now())
    }

    /// [`upsert`](Self::upsert) with an explicit timestamp.
    pub fn upsert_at(&self, identity: Identity, now: DateTime<Utc>) -> bool {
        let mut inner = self.write();
        inner.next_revision += 1;
        let revision = inner.next_revision;
        let username = identity.username.clone();
        let slot = Slot {
            entry: PresenceEntry {
                identity,
                last_seen: now,
            },
            revision,
        };
        inner.slots.insert(username, slot).is_none()
    }

    /// Delete the entry for `username`. Returns whether anything was removed.
    pub fn remove(&self, username: &str) -> bool {
        self.write().slots.remove(username).is_some()
    }

    /// Point-in-time copy of every entry. Order is unspecified.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.read()
            .slots
            .values()
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub fn get(&self, username: &str) -> Option<PresenceEntry> {
        self.read().slots.get(username).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.read().slots.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().slots.is_empty()
    }

    /// Remove every entry not refreshed within `threshold` of now.
    ///
    /// Returns the removed usernames, sorted.
    pub fn evict_older_than(&self, threshold: Duration) -> Vec<String> {
        self.evict_older_than_at(threshold, Utc::now())
    }

    /// [`evict_older_than`](Self::evict_older_than) against an explicit
    /// reference time.
    pub fn evict_older_than_at(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self.stale_candidates(cutoff);
        if candidates.is_empty() {
            return Vec::new();
        }
        self.remove_unchanged(candidates)
    }

    /// Phase 1: scan under the read lock.
    fn stale_candidates(&self, cutoff: DateTime<Utc>) -> Vec<(String, u64)> {
        self.read()
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_stale(cutoff))
            .map(|(username, slot)| (username.clone(), slot.revision))
            .collect()
    }

    /// Phase 2: delete candidates whose revision is unchanged since the
    /// scan. An entry refreshed (or re-created) in between survives.
    fn remove_unchanged(&self, candidates: Vec<(String, u64)>) -> Vec<String> {
        let mut inner = self.write();
        let mut removed = Vec::with_capacity(candidates.len());
        for (username, revision) in candidates {
            let unchanged = inner
                .slots
                .get(&username)
                .is_some_and(|slot| slot.revision == revision);
            if unchanged {
                inner.slots.remove(&username);
                removed.push(username);
            }
        }
        removed.sort();
        removed
    }
}

// ─── Tests ────────────────────────────────────────────────────────
