use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::store::{CacheStore, RefreshPermit};
use crate::forecast::types::{ForecastRecord, ZoneId};
use crate::forecast::ForecastFetcher;

/// Outcome of one finished refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub cycle_id: Uuid,
    pub succeeded: Vec<ZoneId>,
    pub failed: Vec<ZoneId>,
    /// Failed zones whose consecutive-failure count hit a multiple of the
    /// alert threshold in this cycle.
    pub escalated: Vec<ZoneId>,
    pub committed_at: DateTime<Utc>,
}

/// Launches refresh cycles in the background, at most one at a time.
pub struct RefreshCoordinator {
    store: CacheStore,
    fetcher: Arc<dyn ForecastFetcher>,
    zones: Vec<ZoneId>,
    fetch_timeout: Duration,
    failure_alert_threshold: u32,
    consecutive_failures: Arc<Mutex<HashMap<ZoneId, u32>>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: CacheStore,
        fetcher: Arc<dyn ForecastFetcher>,
        zones: Vec<ZoneId>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            zones,
            fetch_timeout,
            failure_alert_threshold: 3,
            consecutive_failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Consecutive failed cycles for one zone before it is logged as an error.
    /// Zero disables the escalation.
    pub fn with_failure_alert_threshold(mut self, threshold: u32) -> Self {
        self.failure_alert_threshold = threshold;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    #[cfg(test)]
    pub fn consecutive_failures(&self, zone: ZoneId) -> u32 {
        self.consecutive_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&zone)
            .copied()
            .unwrap_or(0)
    }

    /// Start a cycle unless one is already running. Never waits for the cycle;
    /// the handle can be awaited or dropped. Must be called inside a Tokio runtime.
    pub fn trigger(&self) -> Option<JoinHandle<RefreshSummary>> {
        let permit = match self.store.try_start_refresh() {
            Some(permit) => permit,
            None => {
                tracing::debug!("Refresh already in progress, skipping trigger");
                return None;
            }
        };

        let cycle_id = Uuid::new_v4();
        let cycle = RefreshCycle {
            cycle_id,
            fetcher: self.fetcher.clone(),
            zones: self.zones.clone(),
            fetch_timeout: self.fetch_timeout,
            failure_alert_threshold: self.failure_alert_threshold,
            consecutive_failures: self.consecutive_failures.clone(),
        };
        let span = tracing::info_span!("refresh_cycle", %cycle_id);

        Some(tokio::spawn(cycle.run(permit).instrument(span)))
    }
}

struct RefreshCycle {
    cycle_id: Uuid,
    fetcher: Arc<dyn ForecastFetcher>,
    zones: Vec<ZoneId>,
    fetch_timeout: Duration,
    failure_alert_threshold: u32,
    consecutive_failures: Arc<Mutex<HashMap<ZoneId, u32>>>,
}

impl RefreshCycle {
    async fn run(self, permit: RefreshPermit) -> RefreshSummary {
        tracing::info!(
            "Updating forecast cache from {} ({} zones)",
            self.fetcher.name(),
            self.zones.len()
        );

        let mut forecasts: BTreeMap<ZoneId, ForecastRecord> = BTreeMap::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for &zone in &self.zones {
            match self.fetch_zone(zone).await {
                Some(record) => {
                    tracing::info!("Cached {} (highest danger {})", zone, record.highest_danger());
                    forecasts.insert(zone, record);
                    succeeded.push(zone);
                }
                None => failed.push(zone),
            }
        }

        let escalated = self.track_failures(&succeeded, &failed);

        let committed_at = permit.commit(forecasts, Utc::now());
        tracing::info!(
            "Cache updated at {} ({} ok, {} failed)",
            committed_at.to_rfc3339(),
            succeeded.len(),
            failed.len()
        );

        RefreshSummary {
            cycle_id: self.cycle_id,
            succeeded,
            failed,
            escalated,
            committed_at,
        }
    }

    /// One attempt for one zone. Errors, timeouts and fetcher panics all come
    /// back as `None`.
    async fn fetch_zone(&self, zone: ZoneId) -> Option<ForecastRecord> {
        let fetcher = self.fetcher.clone();
        let timeout = self.fetch_timeout;
        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, fetcher.fetch(zone)).await
        });

        match task.await {
            Ok(Ok(Ok(record))) => Some(record),
            Ok(Ok(Err(e))) => {
                tracing::warn!("Failed to cache {}: {}", zone, e);
                None
            }
            Ok(Err(_elapsed)) => {
                tracing::warn!("Failed to cache {}: timed out after {:?}", zone, timeout);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to cache {}: fetch task aborted: {}", zone, e);
                None
            }
        }
    }

    /// Update per-zone failure streaks and return the zones that escalated.
    fn track_failures(&self, succeeded: &[ZoneId], failed: &[ZoneId]) -> Vec<ZoneId> {
        let mut counts = self
            .consecutive_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut escalated = Vec::new();

        for zone in succeeded {
            counts.remove(zone);
        }
        for &zone in failed {
            let count = counts.entry(zone).or_insert(0);
            *count += 1;
            if self.failure_alert_threshold > 0 && *count % self.failure_alert_threshold == 0 {
                tracing::error!(
                    "Zone {} has failed {} consecutive refresh cycles",
                    zone,
                    count
                );
                escalated.push(zone);
            }
        }
        escalated
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::store::CommitPolicy;
    use crate::forecast::types::DangerRating;
    use crate::forecast::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    pub(crate) fn sample_record(zone: ZoneId) -> ForecastRecord {
        ForecastRecord {
            zone_name: zone.display_name(),
            publish_date: "2026-01-10".to_string(),
            danger_above_treeline: DangerRating::Considerable,
            danger_near_treeline: DangerRating::Moderate,
            danger_below_treeline: DangerRating::Low,
            bottom_line: "Watch for wind slabs.".to_string(),
            detailed_forecast: String::new(),
            avalanche_problems: vec!["Wind Slab".to_string()],
            cached_at: Utc::now(),
        }
    }

    /// Fetcher with a fixed answer per zone, optionally held at a gate until
    /// the test releases it.
    pub(crate) struct ScriptedFetcher {
        pub ok_zones: Vec<ZoneId>,
        pub panic_zones: Vec<ZoneId>,
        pub hang_zones: Vec<ZoneId>,
        pub gate: Option<Arc<Notify>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        pub(crate) fn succeeding(ok_zones: Vec<ZoneId>) -> Self {
            Self {
                ok_zones,
                panic_zones: vec![],
                hang_zones: vec![],
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn gated(ok_zones: Vec<ZoneId>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::succeeding(ok_zones)
            }
        }
    }

    #[async_trait]
    impl ForecastFetcher for ScriptedFetcher {
        async fn fetch(&self, zone: ZoneId) -> Result<ForecastRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panic_zones.contains(&zone) {
                panic!("scraper blew up on {}", zone);
            }
            if self.hang_zones.contains(&zone) {
                std::future::pending::<()>().await;
            }
            if self.ok_zones.contains(&zone) {
                Ok(sample_record(zone))
            } else {
                Err(FetchError::Simulated(zone))
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn coordinator(fetcher: ScriptedFetcher, zones: Vec<ZoneId>) -> (RefreshCoordinator, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        let coordinator = RefreshCoordinator::new(
            CacheStore::new(CommitPolicy::ReplaceWhole),
            fetcher.clone(),
            zones,
            Duration::from_secs(5),
        );
        (coordinator, fetcher)
    }

    #[tokio::test]
    async fn test_cycle_commits_partial_results() {
        let zones = vec![ZoneId::StevensPass, ZoneId::SnoqualmiePass];
        let (coordinator, fetcher) =
            coordinator(ScriptedFetcher::succeeding(vec![ZoneId::StevensPass]), zones);

        let summary = coordinator.trigger().unwrap().await.unwrap();

        assert_eq!(summary.succeeded, vec![ZoneId::StevensPass]);
        assert_eq!(summary.failed, vec![ZoneId::SnoqualmiePass]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.in_progress);
        assert_eq!(snapshot.last_refresh, Some(summary.committed_at));
        assert_eq!(snapshot.forecasts.keys().copied().collect::<Vec<_>>(), vec![ZoneId::StevensPass]);
    }

    #[tokio::test]
    async fn test_all_failures_still_commit() {
        let (coordinator, _) = coordinator(ScriptedFetcher::succeeding(vec![]), ZoneId::ALL.to_vec());

        let summary = coordinator.trigger().unwrap().await.unwrap();

        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failed.len(), 3);
        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.in_progress);
        assert_eq!(snapshot.last_refresh, Some(summary.committed_at));
        assert!(snapshot.forecasts.is_empty());
    }

    #[tokio::test]
    async fn test_second_trigger_is_noop_while_running() {
        let gate = Arc::new(Notify::new());
        let (coordinator, fetcher) = coordinator(
            ScriptedFetcher::gated(vec![ZoneId::StevensPass], gate.clone()),
            vec![ZoneId::StevensPass],
        );

        let handle = coordinator.trigger().expect("first trigger starts a cycle");
        assert!(coordinator.store().is_updating());
        assert!(coordinator.trigger().is_none());

        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.store().is_updating());
    }

    #[tokio::test]
    async fn test_panicking_fetcher_does_not_wedge_cycle() {
        let fetcher = ScriptedFetcher {
            panic_zones: vec![ZoneId::StevensPass],
            ..ScriptedFetcher::succeeding(vec![ZoneId::EastSlopesCentral])
        };
        let (coordinator, _) =
            coordinator(fetcher, vec![ZoneId::StevensPass, ZoneId::EastSlopesCentral]);

        let summary = coordinator.trigger().unwrap().await.unwrap();

        assert_eq!(summary.failed, vec![ZoneId::StevensPass]);
        assert_eq!(summary.succeeded, vec![ZoneId::EastSlopesCentral]);
        assert!(!coordinator.store().is_updating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out() {
        let fetcher = ScriptedFetcher {
            hang_zones: vec![ZoneId::SnoqualmiePass],
            ..ScriptedFetcher::succeeding(vec![ZoneId::StevensPass])
        };
        let (coordinator, _) =
            coordinator(fetcher, vec![ZoneId::SnoqualmiePass, ZoneId::StevensPass]);

        let summary = coordinator.trigger().unwrap().await.unwrap();

        assert_eq!(summary.failed, vec![ZoneId::SnoqualmiePass]);
        assert_eq!(summary.succeeded, vec![ZoneId::StevensPass]);
        assert!(!coordinator.store().is_updating());
    }

    #[tokio::test]
    async fn test_consecutive_failures_reset_on_success() {
        let (coordinator, _) =
            coordinator(ScriptedFetcher::succeeding(vec![]), vec![ZoneId::StevensPass]);

        coordinator.trigger().unwrap().await.unwrap();
        coordinator.trigger().unwrap().await.unwrap();
        assert_eq!(coordinator.consecutive_failures(ZoneId::StevensPass), 2);

        let recovered = RefreshCoordinator {
            fetcher: Arc::new(ScriptedFetcher::succeeding(vec![ZoneId::StevensPass])),
            ..coordinator
        };
        recovered.trigger().unwrap().await.unwrap();
        assert_eq!(recovered.consecutive_failures(ZoneId::StevensPass), 0);
    }

    async fn run_cycles(coordinator: &RefreshCoordinator, cycles: usize) -> Vec<Vec<ZoneId>> {
        let mut escalations = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            let summary = coordinator.trigger().unwrap().await.unwrap();
            escalations.push(summary.escalated);
        }
        escalations
    }

    #[tokio::test]
    async fn test_escalates_on_each_threshold_multiple() {
        let (coordinator, _) =
            coordinator(ScriptedFetcher::succeeding(vec![]), vec![ZoneId::StevensPass]);
        let coordinator = coordinator.with_failure_alert_threshold(3);

        let escalations = run_cycles(&coordinator, 6).await;

        let none: Vec<ZoneId> = vec![];
        assert_eq!(
            escalations,
            vec![
                none.clone(),
                none.clone(),
                vec![ZoneId::StevensPass],
                none.clone(),
                none.clone(),
                vec![ZoneId::StevensPass],
            ]
        );
        assert_eq!(coordinator.consecutive_failures(ZoneId::StevensPass), 6);
    }

    #[tokio::test]
    async fn test_zero_threshold_never_escalates() {
        let (coordinator, _) =
            coordinator(ScriptedFetcher::succeeding(vec![]), vec![ZoneId::SnoqualmiePass]);
        let coordinator = coordinator.with_failure_alert_threshold(0);

        let escalations = run_cycles(&coordinator, 5).await;

        assert!(escalations.iter().all(|zones| zones.is_empty()));
        assert_eq!(coordinator.consecutive_failures(ZoneId::SnoqualmiePass), 5);
    }

    #[tokio::test]
    async fn test_success_restarts_escalation_streak() {
        let (failing, _) =
            coordinator(ScriptedFetcher::succeeding(vec![]), vec![ZoneId::EastSlopesCentral]);
        let failing = failing.with_failure_alert_threshold(3);
        assert!(run_cycles(&failing, 2).await.iter().all(|zones| zones.is_empty()));

        let healthy = RefreshCoordinator {
            fetcher: Arc::new(ScriptedFetcher::succeeding(vec![ZoneId::EastSlopesCentral])),
            ..failing
        };
        let summary = healthy.trigger().unwrap().await.unwrap();
        assert!(summary.escalated.is_empty());
        assert_eq!(healthy.consecutive_failures(ZoneId::EastSlopesCentral), 0);

        let failing = RefreshCoordinator {
            fetcher: Arc::new(ScriptedFetcher::succeeding(vec![])),
            ..healthy
        };
        let escalations = run_cycles(&failing, 3).await;
        assert!(escalations[0].is_empty());
        assert!(escalations[1].is_empty());
        assert_eq!(escalations[2], vec![ZoneId::EastSlopesCentral]);
    }
}
