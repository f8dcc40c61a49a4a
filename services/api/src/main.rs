use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod live_cache;
mod maintenance;
mod models;
mod repositories;
mod routes;
mod state;

use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};
use engine::{SystemClock, Tracker};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;

use crate::{
    config::Settings, live_cache::LiveLocationCache, maintenance::Maintenance,
    repositories::PgStore, state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting tracking API service");

    let settings = Settings::load()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let tracker = Arc::new(Tracker::new(
        store,
        Arc::new(SystemClock),
        settings.engine_config(),
    ));

    let live_cache = if settings.redis_enabled {
        let redis_config = RedisConfig::from_env();
        let redis = RedisPool::new(&redis_config)?;
        match redis.health_check().await {
            Ok(true) => info!("Redis live-location cache enabled"),
            _ => warn!("Redis is not answering, live locations fall back to the database"),
        }
        Some(LiveLocationCache::new(redis, settings.live_cache_ttl_secs))
    } else {
        None
    };

    let maintenance = Maintenance::new(
        tracker.clone(),
        settings.idle_timeout(),
        settings.gps_retention(),
    );
    let mut scheduler = maintenance.start(&settings.maintenance_schedule).await?;

    let app_state = AppState {
        tracker,
        live_cache,
        gps_retention: settings.gps_retention(),
        idle_timeout: settings.idle_timeout(),
    };
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&settings.bind_address).await?;
    info!("Tracking API listening on {}", settings.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        error!("Failed to stop maintenance scheduler: {}", e);
    }
    info!("Tracking API shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
