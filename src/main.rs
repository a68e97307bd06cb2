use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod config;
mod forecast;
mod routes;
mod utils;

use cache::{CacheStore, ForecastService, RefreshCoordinator};
use config::{Config, ForecastSource};
use forecast::{mock::MockFetcher, nwac::NwacClient, types::ZoneId, ForecastFetcher};
use routes::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nwac_forecast_cache=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let fetcher: Arc<dyn ForecastFetcher> = match config.forecast_source {
        ForecastSource::Nwac => Arc::new(NwacClient::new(&config)?),
        ForecastSource::Mock => Arc::new(
            MockFetcher::new(utils::parse_timezone(&config.app_timezone)?)
                .with_latency(config.mock_latency)
                .with_failure_rate(config.mock_failure_rate),
        ),
    };
    tracing::info!(
        "Using {} forecast source, refresh after {:.1}h, {:?} commit policy",
        fetcher.name(),
        config.cache_duration_hours(),
        config.commit_policy
    );

    let coordinator = RefreshCoordinator::new(
        CacheStore::new(config.commit_policy),
        fetcher,
        ZoneId::ALL.to_vec(),
        config.fetch_timeout,
    )
    .with_failure_alert_threshold(config.failure_alert_threshold);
    let coordinator = Arc::new(coordinator);

    if config.warm_on_start {
        // Runs in the background; early requests see 503 until it lands.
        if let Some(warmup) = coordinator.trigger() {
            tokio::spawn(async move {
                match warmup.await {
                    Ok(summary) => tracing::info!(
                        "Warm-up cycle {} committed at {}: {} cached, {} failed, {} escalated",
                        summary.cycle_id,
                        summary.committed_at.to_rfc3339(),
                        summary.succeeded.len(),
                        summary.failed.len(),
                        summary.escalated.len()
                    ),
                    Err(e) => tracing::error!("Warm-up cycle did not finish: {}", e),
                }
            });
        }
    }

    let threshold = chrono::Duration::from_std(config.cache_duration)?;
    let state = AppState {
        forecasts: Arc::new(ForecastService::new(coordinator, threshold)),
        cache_duration_hours: config.cache_duration_hours(),
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server starting on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
