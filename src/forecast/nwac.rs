use super::types::*;
use super::{FetchError, ForecastFetcher};
use crate::config::Config;
use crate::utils::{html_to_text, local_date, parse_timezone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NwacError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Unexpected status: HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("No danger ratings found on page for {0}")]
    NoRatings(ZoneId),
}

pub struct NwacClient {
    client: Client,
    base_url: String,
    timezone: chrono_tz::Tz,
}

impl NwacClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        let timezone = parse_timezone(&config.app_timezone).map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self {
            client,
            base_url: config.nwac_base_url.clone(),
            timezone,
        })
    }

    pub fn forecast_url(&self, zone: ZoneId) -> String {
        format!("{}#{}", self.base_url, zone.slug())
    }

    pub async fn get_forecast(&self, zone: ZoneId) -> Result<ForecastRecord, NwacError> {
        let url = self.forecast_url(zone);
        tracing::debug!("Fetching NWAC forecast page {}", url);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let html = response.text().await?;
                parse_forecast_page(&html, zone, Utc::now(), self.timezone)
            }
            status => Err(NwacError::Status(status)),
        }
    }
}

#[async_trait]
impl ForecastFetcher for NwacClient {
    async fn fetch(&self, zone: ZoneId) -> Result<ForecastRecord, FetchError> {
        Ok(self.get_forecast(zone).await?)
    }

    fn name(&self) -> &'static str {
        "nwac"
    }
}

struct PagePatterns {
    upper: Regex,
    middle: Regex,
    lower: Regex,
    issued: Regex,
    bottom_line: Regex,
    problem: Regex,
}

fn patterns() -> &'static PagePatterns {
    static PATTERNS: OnceLock<PagePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let band = |name: &str| {
            Regex::new(&format!(
                r"(?is){} Elevations[^<]*?(\d)\s*-\s*(Low|Moderate|Considerable|High|Extreme)",
                name
            ))
            .expect("valid band regex")
        };
        PagePatterns {
            upper: band("Upper"),
            middle: band("Middle"),
            lower: band("Lower"),
            issued: Regex::new(r"(?i)ISSUED[^<]*?<[^>]*>([^<]+)").expect("valid issued regex"),
            bottom_line: Regex::new(r"(?is)Bottom Line.*?<p[^>]*>(.*?)</p>")
                .expect("valid bottom line regex"),
            problem: Regex::new(r"(?i)Avalanche Problem[^<]*?<[^>]*>([^<]+)")
                .expect("valid problem regex"),
        }
    })
}

fn band_rating(pattern: &Regex, html: &str) -> DangerRating {
    pattern
        .captures(html)
        .and_then(|caps| caps.get(2))
        .map(|m| DangerRating::from_label(m.as_str()))
        .unwrap_or_default()
}

/// Turn a forecast page into a record. Fails when none of the three
/// elevation bands carry a readable rating.
pub fn parse_forecast_page(
    html: &str,
    zone: ZoneId,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Result<ForecastRecord, NwacError> {
    let p = patterns();

    let above = band_rating(&p.upper, html);
    let near = band_rating(&p.middle, html);
    let below = band_rating(&p.lower, html);

    if !above.is_known() && !near.is_known() && !below.is_known() {
        return Err(NwacError::NoRatings(zone));
    }

    let publish_date = p
        .issued
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| local_date(now, tz));

    let bottom_line = p
        .bottom_line
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| html_to_text(m.as_str()))
        .unwrap_or_default();

    let mut avalanche_problems: Vec<String> = Vec::new();
    for caps in p.problem.captures_iter(html) {
        if let Some(m) = caps.get(1) {
            let name = html_to_text(m.as_str());
            if !name.is_empty() && !avalanche_problems.contains(&name) {
                avalanche_problems.push(name);
            }
        }
    }

    Ok(ForecastRecord {
        zone_name: zone.display_name(),
        publish_date,
        danger_above_treeline: above,
        danger_near_treeline: near,
        danger_below_treeline: below,
        bottom_line,
        detailed_forecast: String::new(),
        avalanche_problems,
        cached_at: now,
    })
}
