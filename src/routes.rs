use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    cache::{AllForecasts, ForecastService, QueryError},
    forecast::types::{ForecastRecord, ZoneId},
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub forecasts: Arc<ForecastService>,
    /// Configured refresh interval, reported as given rather than rounded.
    pub cache_duration_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: String,
    pub version: String,
    pub endpoints: BTreeMap<&'static str, &'static str>,
    pub zones: Vec<ZoneId>,
    pub cache_info: CacheInfo,
}

#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
    pub cache_duration_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub cache_age_seconds: Option<f64>,
    pub is_updating: bool,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match self {
            QueryError::UnknownZone(_) | QueryError::NoForecast(_) => StatusCode::NOT_FOUND,
            QueryError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// Route handlers
pub async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    let status = state.forecasts.status();

    Json(IndexResponse {
        name: "NWAC Forecast Cache API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: BTreeMap::from([
            ("/forecast/<zone>", "Get forecast for a specific zone"),
            ("/forecast/all", "Get all forecasts"),
            ("/health", "Health check"),
        ]),
        zones: ZoneId::ALL.to_vec(),
        cache_info: CacheInfo {
            last_update: status.last_refresh,
            cache_duration_hours: state.cache_duration_hours,
        },
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.forecasts.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        cache_age_seconds: status.cache_age_seconds,
        is_updating: status.is_updating,
    })
}

pub async fn get_all_forecasts(State(state): State<AppState>) -> Json<AllForecasts> {
    Json(state.forecasts.get_all_forecasts())
}

pub async fn get_zone_forecast(
    State(state): State<AppState>,
    Path(zone): Path<String>,
) -> Result<Json<ForecastRecord>, QueryError> {
    match state.forecasts.get_zone_forecast(&zone) {
        Ok(record) => Ok(Json(record)),
        Err(e) => {
            tracing::debug!("Forecast lookup for {:?} failed: {}", zone, e);
            Err(e)
        }
    }
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/forecast/all", get(get_all_forecasts))
        .route("/forecast/:zone", get(get_zone_forecast))
        .with_state(state)
}
