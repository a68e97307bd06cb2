use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::cache::CommitPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastSource {
    Nwac,
    Mock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub cache_duration: Duration,
    pub fetch_timeout: Duration,
    pub nwac_base_url: String,
    pub user_agent: String,
    pub app_timezone: String,
    pub forecast_source: ForecastSource,
    pub commit_policy: CommitPolicy,
    pub failure_alert_threshold: u32,
    pub warm_on_start: bool,
    pub mock_latency: Duration,
    pub mock_failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 5000,
            cache_duration: Duration::from_secs(6 * 3600),
            fetch_timeout: Duration::from_secs(30),
            nwac_base_url: "https://nwac.us/avalanche-forecast/".to_string(),
            user_agent: format!("NwacForecastCache/{}", env!("CARGO_PKG_VERSION")),
            app_timezone: "America/Los_Angeles".to_string(),
            forecast_source: ForecastSource::Nwac,
            commit_policy: CommitPolicy::ReplaceWhole,
            failure_alert_threshold: 3,
            warm_on_start: true,
            mock_latency: Duration::from_millis(250),
            mock_failure_rate: 0.0,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key/value source, falling back to defaults for
    /// missing keys. Present-but-invalid values are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number, got {:?}", raw))?,
            None => defaults.port,
        };

        let cache_duration = match lookup("CACHE_DURATION_HOURS") {
            Some(raw) => {
                let hours = raw.trim().parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("CACHE_DURATION_HOURS must be a number, got {:?}", raw)
                })?;
                if !hours.is_finite() || hours <= 0.0 {
                    anyhow::bail!("CACHE_DURATION_HOURS must be positive, got {}", hours);
                }
                let duration = Duration::try_from_secs_f64(hours * 3600.0).map_err(|_| {
                    anyhow::anyhow!("CACHE_DURATION_HOURS out of range, got {}", hours)
                })?;
                chrono::Duration::from_std(duration).map_err(|_| {
                    anyhow::anyhow!("CACHE_DURATION_HOURS out of range, got {}", hours)
                })?;
                duration
            }
            None => defaults.cache_duration,
        };

        let fetch_timeout = match lookup("FETCH_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    anyhow::anyhow!("FETCH_TIMEOUT_SECS must be whole seconds, got {:?}", raw)
                })?;
                if secs == 0 {
                    anyhow::bail!("FETCH_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => defaults.fetch_timeout,
        };

        let forecast_source = match lookup("FORECAST_SOURCE").as_deref().map(str::trim) {
            None | Some("nwac") => ForecastSource::Nwac,
            Some("mock") => ForecastSource::Mock,
            Some(other) => anyhow::bail!("FORECAST_SOURCE must be nwac or mock, got {:?}", other),
        };

        let commit_policy = match lookup("CACHE_COMMIT_POLICY").as_deref().map(str::trim) {
            None | Some("replace") => CommitPolicy::ReplaceWhole,
            Some("merge") => CommitPolicy::Merge,
            Some(other) => {
                anyhow::bail!("CACHE_COMMIT_POLICY must be replace or merge, got {:?}", other)
            }
        };

        let failure_alert_threshold = match lookup("FAILURE_ALERT_THRESHOLD") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                anyhow::anyhow!("FAILURE_ALERT_THRESHOLD must be a count, got {:?}", raw)
            })?,
            None => defaults.failure_alert_threshold,
        };

        let warm_on_start = match lookup("WARM_ON_START").as_deref().map(str::trim) {
            None => defaults.warm_on_start,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => anyhow::bail!("WARM_ON_START must be a boolean, got {:?}", other),
        };

        let mock_latency = match lookup("MOCK_LATENCY_MS") {
            Some(raw) => Duration::from_millis(raw.trim().parse::<u64>().map_err(|_| {
                anyhow::anyhow!("MOCK_LATENCY_MS must be whole milliseconds, got {:?}", raw)
            })?),
            None => defaults.mock_latency,
        };

        let mock_failure_rate = match lookup("MOCK_FAILURE_RATE") {
            Some(raw) => {
                let rate = raw.trim().parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("MOCK_FAILURE_RATE must be a number, got {:?}", raw)
                })?;
                if !(0.0..=1.0).contains(&rate) {
                    anyhow::bail!("MOCK_FAILURE_RATE must be between 0 and 1, got {}", rate);
                }
                rate
            }
            None => defaults.mock_failure_rate,
        };

        let app_timezone = lookup("APP_TIMEZONE").unwrap_or(defaults.app_timezone);
        crate::utils::parse_timezone(&app_timezone).map_err(|e| anyhow::anyhow!(e))?;

        Ok(Config {
            port,
            cache_duration,
            fetch_timeout,
            nwac_base_url: lookup("NWAC_BASE_URL").unwrap_or(defaults.nwac_base_url),
            user_agent: lookup("HTTP_USER_AGENT").unwrap_or(defaults.user_agent),
            app_timezone,
            forecast_source,
            commit_policy,
            failure_alert_threshold,
            warm_on_start,
            mock_latency,
            mock_failure_rate,
        })
    }

    pub fn cache_duration_hours(&self) -> f64 {
        self.cache_duration.as_secs_f64() / 3600.0
    }
}
