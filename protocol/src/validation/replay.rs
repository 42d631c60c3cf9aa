//! Replay protection: the set of (issuer role, nonce) pairs already
//! accepted.
//!
//! ## Design
//!
//! The set is shared by every transaction in the process, so it lives in a
//! `DashMap` and the only mutating primitive on the hot path is
//! [`ReplayGuard::check_and_insert`], which goes through the map's entry API:
//! two concurrent submissions of the same nonce cannot both observe it as
//! unseen.
//!
//! Each entry is retained until the mandate that used it has expired plus a
//! grace period. After that an attacker replaying the bytes would be
//! rejected as `Expired` anyway, so the entry may be purged.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::roles::Role;

/// Identity of one single-use nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplayKey {
    pub issuer_role: Role,
    pub nonce: String,
}

impl ReplayKey {
    pub fn new(issuer_role: Role, nonce: impl Into<String>) -> Self {
        Self {
            issuer_role,
            nonce: nonce.into(),
        }
    }
}

impl fmt::Display for ReplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.issuer_role, self.nonce)
    }
}

/// Shared replay-nonce set.
pub struct ReplayGuard {
    /// Key -> instant after which the entry may be purged.
    seen: DashMap<ReplayKey, DateTime<Utc>>,
    grace: Duration,
}

impl fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("entries", &self.seen.len())
            .field("grace", &self.grace)
            .finish()
    }
}

impl ReplayGuard {
    pub fn new(grace: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            grace,
        }
    }

    /// Atomically record `key` unless it is already present. Returns `true`
    /// when the key was fresh.
    pub fn check_and_insert(&self, key: ReplayKey, expires_at: DateTime<Utc>) -> bool {
        match self.seen.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at + self.grace);
                true
            }
        }
    }

    pub fn contains(&self, key: &ReplayKey) -> bool {
        self.seen.contains_key(key)
    }

    /// Undo an insertion made earlier in the same validation call.
    pub(crate) fn release(&self, key: &ReplayKey) {
        self.seen.remove(key);
    }

    /// Re-insert a persisted entry on startup. Keeps the later retention
    /// when the key is already present.
    pub fn restore(&self, key: ReplayKey, retain_until: DateTime<Utc>) {
        self.seen
            .entry(key)
            .and_modify(|until| {
                if retain_until > *until {
                    *until = retain_until;
                }
            })
            .or_insert(retain_until);
    }

    /// Retention deadline recorded for `key`.
    pub fn retain_until(&self, key: &ReplayKey) -> Option<DateTime<Utc>> {
        self.seen.get(key).map(|v| *v)
    }

    /// Drop entries whose retention deadline has passed. Returns the purged
    /// keys so callers can mirror the purge in storage.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<ReplayKey> {
        // Collect first; never mutate while holding a DashMap iterator.
        let expired: Vec<ReplayKey> = self
            .seen
            .iter()
            .filter(|e| *e.value() < now)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.seen.remove(key);
        }
        if !expired.is_empty() {
            tracing::debug!(purged = expired.len(), "replay entries purged");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(Duration::seconds(
            crate::config::DEFAULT_REPLAY_RETENTION_GRACE.as_secs() as i64,
        ))
    }
}
