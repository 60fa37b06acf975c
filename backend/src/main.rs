//! Farm Operations Platform - Backend Server
//!
//! Tracks trays of crops through their growth cycle across growing systems
//! of fixed capacity, and proposes scheduled stage moves.

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod services;
mod store;

pub use crate::config::Config;

use crate::config::{LogFormat, StorageBackend};
use error::AppError;
use services::{EventBus, MovementBoard, MovementService, SystemService, TransitionLocks, TrayService};
use store::{FarmStore, MemoryStore, PgStore};

/// Log filter used when `RUST_LOG` is unset. `shared` carries domain
/// warnings such as the default growth-duration fallback.
const DEFAULT_LOG_FILTER: &str = "farm_ops_server=debug,shared=info,tower_http=debug,sqlx=warn";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn FarmStore>,
    pub locks: TransitionLocks,
    pub events: EventBus,
    pub movements: MovementBoard,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn FarmStore>) -> Self {
        let events = EventBus::new(config.events.buffer);
        Self {
            config: Arc::new(config),
            store,
            locks: TransitionLocks::new(),
            events,
            movements: MovementBoard::default(),
        }
    }

    pub fn systems(&self) -> SystemService {
        SystemService::new(self.store.clone(), self.locks.clone(), self.events.clone())
    }

    pub fn trays(&self) -> TrayService {
        TrayService::new(self.store.clone(), self.locks.clone(), self.events.clone())
    }

    pub fn movement_service(&self) -> MovementService {
        MovementService::new(
            self.store.clone(),
            self.locks.clone(),
            self.events.clone(),
            self.movements.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting Farm Operations Server");
    tracing::info!("Environment: {}", config.environment);

    if config.is_production() && config.jwt.secret == "development-secret-key" {
        return Err(AppError::Configuration(
            "jwt.secret must be set in production".to_string(),
        )
        .into());
    }

    let store = connect_store(&config).await?;

    // Create application state
    let state = AppState::new(config.clone(), store);

    if config.scheduler.enabled {
        services::spawn_scheduler(state.movement_service(), config.scheduler.interval_secs);
    } else {
        tracing::info!("Movement scheduler disabled");
    }

    // Build application
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|_| AppError::Configuration(format!("Invalid server.host {}", config.server.host)))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the configured storage adapter
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn FarmStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            let store: Arc<dyn FarmStore> = Arc::new(MemoryStore::new());
            Ok(store)
        }
        StorageBackend::Postgres => {
            if config.database.url.is_empty() {
                return Err(AppError::Configuration(
                    "database.url is required for postgres storage".to_string(),
                )
                .into());
            }

            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&config.database.url)
                .await?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&db_pool).await?;
            tracing::info!("Migrations completed");

            let store: Arc<dyn FarmStore> = Arc::new(PgStore::new(db_pool));
            Ok(store)
        }
    }
}

/// Create the application router with all routes and middleware
fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Farm Operations Platform API v1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_filter_keeps_growth_fallback_warning() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            );

        let planted = NaiveDate::from_ymd_opt(2025, 7, 17).unwrap();
        let estimate = tracing::subscriber::with_default(subscriber, || {
            shared::estimate_harvest("Dragonfruit Sprouts", planted)
        });

        assert!(estimate.defaulted);
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("using default growth duration"));
    }
}
