use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::forecast::types::{ForecastRecord, ZoneId};

/// What happens to zones that failed during a refresh cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// The committed mapping is exactly the cycle's successes; a zone that
    /// failed loses any previously cached record.
    #[default]
    ReplaceWhole,
    /// The cycle's successes overwrite; failed zones keep their old record.
    Merge,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub forecasts: BTreeMap<ZoneId, ForecastRecord>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub in_progress: bool,
}

/// Shared cache state. Every operation takes the one lock for its whole
/// duration, so each is atomic on its own; nothing spans two operations.
#[derive(Clone)]
pub struct CacheStore {
    state: Arc<Mutex<CacheSnapshot>>,
    policy: CommitPolicy,
}

impl CacheStore {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheSnapshot::default())),
            policy,
        }
    }

    // No critical section can panic halfway through a mutation, so a poisoned
    // lock still guards a consistent snapshot.
    fn lock(&self) -> MutexGuard<'_, CacheSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.lock().clone()
    }

    /// Record for `zone` together with the in-progress flag, read under one lock.
    pub fn zone_entry(&self, zone: ZoneId) -> (Option<ForecastRecord>, bool) {
        let state = self.lock();
        (state.forecasts.get(&zone).cloned(), state.in_progress)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.lock().last_refresh
    }

    #[cfg(test)]
    pub fn is_updating(&self) -> bool {
        self.lock().in_progress
    }

    /// Flip in-progress from false to true. Returns `None` when a cycle is
    /// already running. The permit must be committed to publish results; if it
    /// is dropped instead, the flag is cleared and the timestamp left alone.
    pub fn try_start_refresh(&self) -> Option<RefreshPermit> {
        let mut state = self.lock();
        if state.in_progress {
            return None;
        }
        state.in_progress = true;
        Some(RefreshPermit {
            store: self.clone(),
            committed: false,
        })
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CommitPolicy::default())
    }
}

#[must_use = "dropping a permit abandons the refresh cycle without publishing it"]
pub struct RefreshPermit {
    store: CacheStore,
    committed: bool,
}

impl RefreshPermit {
    /// Publish a cycle's results and clear in-progress. Returns the resulting
    /// last-refresh timestamp, which never moves backwards.
    pub fn commit(
        mut self,
        results: BTreeMap<ZoneId, ForecastRecord>,
        at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let mut state = self.store.lock();
        match self.store.policy {
            CommitPolicy::ReplaceWhole => state.forecasts = results,
            CommitPolicy::Merge => state.forecasts.extend(results),
        }
        let stamped = match state.last_refresh {
            Some(previous) if previous > at => previous,
            _ => at,
        };
        state.last_refresh = Some(stamped);
        state.in_progress = false;
        self.committed = true;
        stamped
    }
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!("Refresh cycle abandoned before commit, clearing in-progress flag");
            self.store.lock().in_progress = false;
        }
    }
}
