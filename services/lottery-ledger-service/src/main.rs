// =============================================================================
// LOTTERY LEDGER SERVICE - Main Entry Point
// =============================================================================
// Daily ledger for lottery retailers.
//
// WHAT THIS SERVICE DOES:
// - Tracks ticket boxes (opening/closing counters, sales per business day)
// - Tracks ticket packs (serial ranges, remaining inventory, status)
// - Rolls counters over to a new business day, explicitly or on first scan
// - Pushes every change to dashboards over WebSocket (and Redis, if set)
// - Exposes Prometheus metrics and health/readiness checks
// =============================================================================

// -----------------------------------------------------------------------------
// MODULE DECLARATIONS
// -----------------------------------------------------------------------------
mod calendar;    // Business day boundaries and clocks
mod config;      // Configuration loading
mod db;          // PostgreSQL backend
mod error;       // Error taxonomy and HTTP mapping
mod handlers;    // HTTP request handlers
mod ledger;      // Box ledger transitions
mod metrics;     // Prometheus metrics
mod models;      // Records and API types
mod money;       // Currency bounds and checked arithmetic
mod notify;      // Change notifications
mod sales;       // Daily sales reconciliation records
mod serial;      // Serial number parsing and ranges
mod service;     // Command orchestration
mod store;       // Storage trait + in-memory backend
mod tracker;     // Ticket pack transitions
mod ws;          // WebSocket subscriptions

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::calendar::SystemClock;
use crate::config::{Config, StorageBackend};
use crate::db::Database;
use crate::metrics::setup_metrics;
use crate::notify::Notifier;
use crate::service::LedgerService;
use crate::store::{LedgerStore, MemoryStore};

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Built once in main() and handed to every handler through State<Arc<_>>.
pub struct AppState {
    /// Ledger commands (owns the store, notifier, calendar and clock)
    pub service: LedgerService,

    /// Kept for the readiness PING; None when REDIS_URL is unset
    pub redis: Option<redis::aio::ConnectionManager>,

    /// Renders /metrics
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ----- Health, readiness, metrics -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Live updates -----
        .route("/ws", get(ws::ws_handler))
        // ----- Box ledger -----
        .route("/api/boxes", post(handlers::create_box))
        .route("/api/boxes/active", get(handlers::list_active_boxes))
        .route("/api/boxes/:id", get(handlers::get_box))
        .route("/api/boxes/:id/scan", post(handlers::record_scan))
        .route("/api/boxes/:id/manual-entry", post(handlers::record_manual_entry))
        .route("/api/boxes/:id/reset-day", post(handlers::reset_box_for_new_day))
        .route("/api/boxes/:id/load", post(handlers::load_box))
        .route("/api/boxes/:id/deactivate", post(handlers::deactivate_box))
        .route("/api/boxes/:id/next-ticket", get(handlers::next_ticket))
        // ----- Ticket packs -----
        .route("/api/tickets", post(handlers::register_pack))
        .route("/api/tickets/active/:store_id", get(handlers::list_active_packs))
        .route("/api/tickets/inactive/:store_id", get(handlers::list_inactive_packs))
        .route("/api/tickets/history/:store_id", get(handlers::pack_history))
        .route("/api/tickets/reset/:store_id", post(handlers::reset_daily_numbers))
        .route("/api/tickets/:id", patch(handlers::update_pack))
        // ----- Sales -----
        .route("/api/stores/:store_id/sales", get(handlers::store_sales))
        .route("/api/sales", post(handlers::record_daily_sales))
        .route("/api/sales/:id", patch(handlers::update_daily_sales))
        .route("/api/sales/daily/:store_id", get(handlers::daily_sales))
        .route("/api/sales/monthly/:store_id", get(handlers::monthly_sales))
        .route("/api/sales/yearly/:store_id", get(handlers::yearly_sales))
        // ----- Middleware Layers -----
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -----------------------------------------------------------------------------
// MAIN FUNCTION
// -----------------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok(); // a missing .env file is fine

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG controls levels, e.g. RUST_LOG=info,lottery_ledger_service=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lottery_ledger_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Lottery Ledger Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    let calendar = config.calendar()?;
    info!(
        port = config.port,
        storage = ?config.storage,
        business_utc_offset_minutes = config.business_utc_offset_minutes,
        max_update_retries = config.max_update_retries,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Open storage
    // -------------------------------------------------------------------------
    let store: Arc<dyn LedgerStore> = match config.storage {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;
            let db = Database::connect(url).await?;
            info!("Connected to PostgreSQL");

            db.run_migrations().await?;
            info!("Database migrations completed");
            Arc::new(db)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // -------------------------------------------------------------------------
    // STEP 6: Connect to Redis (optional)
    // -------------------------------------------------------------------------
    // ConnectionManager reconnects on its own
    let redis = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            info!("Connected to Redis");
            Some(conn)
        }
        None => {
            info!("REDIS_URL not set; notifications stay in-process");
            None
        }
    };

    let notifier = match &redis {
        Some(conn) => Notifier::with_redis(conn.clone()),
        None => Notifier::new(),
    };

    // -------------------------------------------------------------------------
    // STEP 7: Create application state
    // -------------------------------------------------------------------------
    let service = LedgerService::new(
        store,
        notifier,
        calendar,
        Arc::new(SystemClock),
        config.max_update_retries,
    );
    let state = Arc::new(AppState {
        service,
        redis,
        metrics_handle,
    });

    // -------------------------------------------------------------------------
    // STEP 8: Start the HTTP server
    // -------------------------------------------------------------------------
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Lottery Ledger Service is listening");
    axum::serve(listener, app).await?;

    Ok(())
}
