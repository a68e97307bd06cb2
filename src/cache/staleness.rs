use chrono::{DateTime, Duration, Utc};

/// A cache that has never been refreshed is always stale. Otherwise it is
/// stale once strictly more than `threshold` has passed since the last refresh.
pub fn is_stale(last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match last_refresh {
        None => true,
        Some(last) => now - last > threshold,
    }
}
