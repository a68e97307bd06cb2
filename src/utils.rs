use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Parse IANA timezone string
pub fn parse_timezone(tz_str: &str) -> Result<chrono_tz::Tz, String> {
    tz_str
        .parse::<chrono_tz::Tz>()
        .map_err(|_| format!("Invalid timezone: {}", tz_str))
}

/// Calendar date (`YYYY-MM-DD`) of `utc_time` in the given timezone.
pub fn local_date(utc_time: DateTime<Utc>, tz: chrono_tz::Tz) -> String {
    utc_time.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

/// Remove markup and collapse runs of whitespace into single spaces.
pub fn html_to_text(fragment: &str) -> String {
    let without_tags = tag_pattern().replace_all(fragment, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&rsquo;", "'")
        .replace("&quot;", "\"");
    collapse_whitespace(&decoded)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Seconds elapsed between `then` and `now`, clamped at zero.
pub fn age_seconds(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - then).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
