use super::types::*;
use super::{FetchError, ForecastFetcher};
use crate::utils::local_date;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

const PROBLEMS: [&str; 5] = [
    "Wind Slab",
    "Storm Slab",
    "Persistent Slab",
    "Loose Wet",
    "Cornice",
];

/// Offline fetcher that invents plausible forecasts. Used for local runs with
/// `FORECAST_SOURCE=mock` so the service can be exercised without hitting NWAC.
pub struct MockFetcher {
    latency: Duration,
    failure_rate: f64,
    timezone: chrono_tz::Tz,
}

impl MockFetcher {
    /// `timezone` decides the calendar day used as the publish date.
    pub fn new(timezone: chrono_tz::Tz) -> Self {
        Self {
            latency: Duration::from_millis(250),
            failure_rate: 0.0,
            timezone,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability in `[0, 1]` that a zone fetch fails.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn random_rating() -> DangerRating {
        match fastrand::u8(1..=5) {
            1 => DangerRating::Low,
            2 => DangerRating::Moderate,
            3 => DangerRating::Considerable,
            4 => DangerRating::High,
            _ => DangerRating::Extreme,
        }
    }

    fn step_down(rating: DangerRating) -> DangerRating {
        match rating {
            DangerRating::Extreme => DangerRating::High,
            DangerRating::High => DangerRating::Considerable,
            DangerRating::Considerable => DangerRating::Moderate,
            _ => DangerRating::Low,
        }
    }

    pub fn generate(zone: ZoneId, now: DateTime<Utc>, timezone: chrono_tz::Tz) -> ForecastRecord {
        // Danger tends to drop with elevation
        let above = Self::random_rating();
        let near = if fastrand::bool() { above } else { Self::step_down(above) };
        let below = if fastrand::bool() { near } else { Self::step_down(near) };

        let problem_count = fastrand::usize(0..=2);
        let mut avalanche_problems: Vec<String> = Vec::with_capacity(problem_count);
        while avalanche_problems.len() < problem_count {
            let pick = PROBLEMS[fastrand::usize(0..PROBLEMS.len())].to_string();
            if !avalanche_problems.contains(&pick) {
                avalanche_problems.push(pick);
            }
        }

        ForecastRecord {
            zone_name: zone.display_name(),
            publish_date: local_date(now, timezone),
            danger_above_treeline: above,
            danger_near_treeline: near,
            danger_below_treeline: below,
            bottom_line: format!(
                "{} danger above treeline in the {} zone.",
                above,
                zone.display_name()
            ),
            detailed_forecast: String::new(),
            avalanche_problems,
            cached_at: now,
        }
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new(chrono_tz::America::Los_Angeles)
    }
}

#[async_trait]
impl ForecastFetcher for MockFetcher {
    async fn fetch(&self, zone: ZoneId) -> Result<ForecastRecord, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 && fastrand::f64() < self.failure_rate {
            return Err(FetchError::Simulated(zone));
        }
        Ok(Self::generate(zone, Utc::now(), self.timezone))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_records_are_consistent() {
        for _ in 0..50 {
            let record = MockFetcher::generate(
                ZoneId::StevensPass,
                Utc::now(),
                chrono_tz::America::Los_Angeles,
            );
            assert_eq!(record.zone_name, "Stevens Pass");
            assert!(record.danger_above_treeline.is_known());
            assert!(record.danger_near_treeline <= record.danger_above_treeline);
            assert!(record.danger_below_treeline <= record.danger_near_treeline);
            assert!(record.avalanche_problems.len() <= 2);
        }
    }

    #[test]
    fn test_publish_date_uses_configured_timezone() {
        // 03:00 UTC on Jan 10 is the evening of Jan 9 in Seattle.
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 3, 0, 0).unwrap();

        let seattle =
            MockFetcher::generate(ZoneId::StevensPass, now, chrono_tz::America::Los_Angeles);
        let utc = MockFetcher::generate(ZoneId::StevensPass, now, chrono_tz::UTC);

        assert_eq!(seattle.publish_date, "2026-01-09");
        assert_eq!(utc.publish_date, "2026-01-10");
        assert_eq!(seattle.cached_at, now);
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let fetcher = MockFetcher::default()
            .with_latency(Duration::ZERO)
            .with_failure_rate(1.0);
        let result = fetcher.fetch(ZoneId::SnoqualmiePass).await;
        assert!(matches!(result, Err(FetchError::Simulated(ZoneId::SnoqualmiePass))));
    }

    #[tokio::test]
    async fn test_default_mock_succeeds() {
        let fetcher = MockFetcher::default().with_latency(Duration::ZERO);
        let record = fetcher.fetch(ZoneId::EastSlopesCentral).await.unwrap();
        assert_eq!(record.zone_name, "East Slopes Central");
    }
}
