use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::coordinator::RefreshCoordinator;
use super::staleness::is_stale;
use super::store::CacheStore;
use crate::forecast::types::{ForecastRecord, ZoneId};
use crate::utils::age_seconds;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown zone: {0}")]
    UnknownZone(String),
    #[error("No forecast available for {0}")]
    NoForecast(ZoneId),
    #[error("Cache is being updated, please try again in a moment")]
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllForecasts {
    pub forecasts: BTreeMap<ZoneId, ForecastRecord>,
    pub cached_at: Option<DateTime<Utc>>,
    pub is_updating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub last_refresh: Option<DateTime<Utc>>,
    pub is_updating: bool,
    pub cache_age_seconds: Option<f64>,
}

/// Read side of the cache. Reads may kick off a background refresh but always
/// answer from whatever is cached at that moment.
pub struct ForecastService {
    coordinator: Arc<RefreshCoordinator>,
    threshold: Duration,
}

impl ForecastService {
    pub fn new(coordinator: Arc<RefreshCoordinator>, threshold: Duration) -> Self {
        Self { coordinator, threshold }
    }

    fn store(&self) -> &CacheStore {
        self.coordinator.store()
    }

    /// Fire-and-forget refresh when the cache is stale. Returns whether this
    /// call started a cycle.
    pub fn refresh_if_stale(&self) -> bool {
        if !is_stale(self.store().last_refresh(), Utc::now(), self.threshold) {
            return false;
        }
        match self.coordinator.trigger() {
            Some(_detached) => {
                tracing::debug!("Cache stale, background refresh started");
                true
            }
            None => false,
        }
    }

    pub fn get_zone_forecast(&self, zone: &str) -> Result<ForecastRecord, QueryError> {
        let zone: ZoneId = zone
            .parse()
            .map_err(|_| QueryError::UnknownZone(zone.to_string()))?;

        self.refresh_if_stale();

        match self.store().zone_entry(zone) {
            (Some(record), _) => Ok(record),
            (None, true) => Err(QueryError::Busy),
            (None, false) => Err(QueryError::NoForecast(zone)),
        }
    }

    pub fn get_all_forecasts(&self) -> AllForecasts {
        self.refresh_if_stale();

        let snapshot = self.store().snapshot();
        AllForecasts {
            forecasts: snapshot.forecasts,
            cached_at: snapshot.last_refresh,
            is_updating: snapshot.in_progress,
        }
    }

    /// Cache metadata for health and index endpoints. Never triggers a refresh.
    pub fn status(&self) -> CacheStatus {
        let snapshot = self.store().snapshot();
        CacheStatus {
            last_refresh: snapshot.last_refresh,
            is_updating: snapshot.in_progress,
            cache_age_seconds: snapshot
                .last_refresh
                .map(|last| age_seconds(last, Utc::now())),
        }
    }
}
