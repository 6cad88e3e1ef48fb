//! Bounded in-process tier of the PAR cache.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::key::ParCacheKey;
use super::request::AuthRequest;

/// A request held in memory together with its absolute expiry.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub request: AuthRequest,
    pub expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a memory lookup.
#[derive(Debug)]
pub enum Lookup {
    Hit(AuthRequest),
    Miss,
    /// Present but past its expiry; already evicted.
    Expired,
}

/// Outcome of a backfill attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Backfill {
    Stored { evicted: Option<ParCacheKey> },
    /// A delete landed after the epoch was read; the entry was dropped.
    Stale,
}

/// LRU entries plus a counter bumped by every delete.
pub struct Slots {
    entries: LruCache<ParCacheKey, MemoryEntry>,
    delete_epoch: u64,
}

/// The memory tier is a capability decided once at construction.
///
/// `Disabled` turns every operation into a no-op so lookups always fall
/// through to the durable store. The mutex is never held across an await.
pub enum MemoryTier {
    Enabled(Mutex<Slots>),
    Disabled,
}

impl MemoryTier {
    /// Zero capacity disables the tier.
    pub fn new(capacity: u16) -> Self {
        match NonZeroUsize::new(capacity as usize) {
            Some(capacity) => Self::Enabled(Mutex::new(Slots {
                entries: LruCache::new(capacity),
                delete_epoch: 0,
            })),
            None => Self::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub fn capacity(&self) -> usize {
        match self {
            Self::Enabled(slots) => slots.lock().entries.cap().get(),
            Self::Disabled => 0,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Enabled(slots) => slots.lock().entries.len(),
            Self::Disabled => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, promoting it on a hit and evicting it when expired.
    pub fn get(&self, key: &ParCacheKey, now: DateTime<Utc>) -> Lookup {
        let Self::Enabled(slots) = self else {
            return Lookup::Miss;
        };

        let mut slots = slots.lock();
        let expired = match slots.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Lookup::Hit(entry.request.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            slots.entries.pop(key);
            Lookup::Expired
        } else {
            Lookup::Miss
        }
    }

    /// Insert or replace; returns the key evicted to make room, if any.
    pub fn insert(&self, key: ParCacheKey, entry: MemoryEntry) -> Option<ParCacheKey> {
        let Self::Enabled(slots) = self else {
            return None;
        };

        push(&mut slots.lock().entries, key, entry)
    }

    /// Number of deletes seen so far. Read before a durable lookup and hand
    /// it back to [`MemoryTier::backfill`].
    pub fn delete_epoch(&self) -> u64 {
        match self {
            Self::Enabled(slots) => slots.lock().delete_epoch,
            Self::Disabled => 0,
        }
    }

    /// Insert a row read from the durable tier unless any delete ran since
    /// `epoch` was taken.
    pub fn backfill(&self, key: ParCacheKey, entry: MemoryEntry, epoch: u64) -> Backfill {
        let Self::Enabled(slots) = self else {
            return Backfill::Stale;
        };

        let mut slots = slots.lock();
        if slots.delete_epoch != epoch {
            return Backfill::Stale;
        }
        Backfill::Stored {
            evicted: push(&mut slots.entries, key, entry),
        }
    }

    /// Evict `key` and advance the delete epoch; a missing key is a no-op.
    pub fn remove(&self, key: &ParCacheKey) -> bool {
        match self {
            Self::Enabled(slots) => {
                let mut slots = slots.lock();
                slots.delete_epoch = slots.delete_epoch.wrapping_add(1);
                slots.entries.pop(key).is_some()
            }
            Self::Disabled => false,
        }
    }

    /// Peek without touching recency.
    pub fn contains(&self, key: &ParCacheKey) -> bool {
        match self {
            Self::Enabled(slots) => slots.lock().entries.contains(key),
            Self::Disabled => false,
        }
    }
}

fn push(
    entries: &mut LruCache<ParCacheKey, MemoryEntry>,
    key: ParCacheKey,
    entry: MemoryEntry,
) -> Option<ParCacheKey> {
    match entries.push(key.clone(), entry) {
        Some((evicted, _)) if evicted != key => Some(evicted),
        _ => None,
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled(_) => f
                .debug_struct("Enabled")
                .field("capacity", &self.capacity())
                .field("len", &self.len())
                .finish(),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}
