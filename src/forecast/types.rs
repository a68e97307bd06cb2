use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Forecast zones served by this instance. The set is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneId {
    StevensPass,
    SnoqualmiePass,
    EastSlopesCentral,
}

impl ZoneId {
    pub const ALL: [ZoneId; 3] = [
        ZoneId::StevensPass,
        ZoneId::SnoqualmiePass,
        ZoneId::EastSlopesCentral,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            ZoneId::StevensPass => "stevens-pass",
            ZoneId::SnoqualmiePass => "snoqualmie-pass",
            ZoneId::EastSlopesCentral => "east-slopes-central",
        }
    }

    /// Title-cased slug, e.g. "Stevens Pass".
    pub fn display_name(&self) -> String {
        self.slug()
            .split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown zone: {0}")]
pub struct UnknownZone(pub String);

impl FromStr for ZoneId {
    type Err = UnknownZone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZoneId::ALL
            .iter()
            .copied()
            .find(|zone| zone.slug() == s)
            .ok_or_else(|| UnknownZone(s.to_string()))
    }
}

/// North American avalanche danger scale, plus `Unknown` for bands the
/// fetcher could not read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum DangerRating {
    #[default]
    Unknown,
    Low,
    Moderate,
    Considerable,
    High,
    Extreme,
}

impl DangerRating {
    pub fn label(&self) -> &'static str {
        match self {
            DangerRating::Unknown => "Unknown",
            DangerRating::Low => "Low",
            DangerRating::Moderate => "Moderate",
            DangerRating::Considerable => "Considerable",
            DangerRating::High => "High",
            DangerRating::Extreme => "Extreme",
        }
    }

    /// Case-insensitive label lookup. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => DangerRating::Low,
            "moderate" => DangerRating::Moderate,
            "considerable" => DangerRating::Considerable,
            "high" => DangerRating::High,
            "extreme" => DangerRating::Extreme,
            _ => DangerRating::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != DangerRating::Unknown
    }
}

impl fmt::Display for DangerRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One parsed forecast for one zone. Never mutated after a fetch produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub zone_name: String,
    pub publish_date: String,
    pub danger_above_treeline: DangerRating,
    pub danger_near_treeline: DangerRating,
    pub danger_below_treeline: DangerRating,
    #[serde(default)]
    pub bottom_line: String,
    #[serde(default)]
    pub detailed_forecast: String,
    #[serde(default)]
    pub avalanche_problems: Vec<String>,
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

impl ForecastRecord {
    pub fn highest_danger(&self) -> DangerRating {
        self.danger_above_treeline
            .max(self.danger_near_treeline)
            .max(self.danger_below_treeline)
    }
}
