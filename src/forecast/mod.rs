pub mod mock;
pub mod nwac;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use types::{ForecastRecord, ZoneId};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("NWAC request failed: {0}")]
    Nwac(#[from] nwac::NwacError),
    #[error("Simulated upstream failure for {0}")]
    Simulated(ZoneId),
}

/// Source of forecast records. Implementations are expected to bound their own
/// I/O with a timeout; every `Err` is treated as "no record this cycle".
#[async_trait]
pub trait ForecastFetcher: Send + Sync {
    async fn fetch(&self, zone: ZoneId) -> Result<ForecastRecord, FetchError>;

    fn name(&self) -> &'static str;
}
