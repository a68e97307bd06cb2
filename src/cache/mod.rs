//! Forecast cache: one shared snapshot, refreshed in the background when it
//! goes stale. At most one refresh cycle runs at a time and readers never wait
//! for it.

pub mod coordinator;
pub mod query;
pub mod staleness;
pub mod store;

pub use coordinator::RefreshCoordinator;
pub use query::{AllForecasts, ForecastService, QueryError};
pub use store::{CacheStore, CommitPolicy};
