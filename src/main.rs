use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod dto;
mod error;
mod handlers;
mod models;
mod notify;
mod reminders;
mod schedule;
mod store;

use config::Config;
use notify::{BroadcastDispatcher, NotificationDispatcher};
use reminders::ReminderRegistry;
use schedule::clock::SystemClock;
use schedule::{MoodScheduleManager, ScheduleConfig};
use store::local::{FileScheduleStore, MemoryScheduleStore, ScheduleStore};
use store::remote::PgMoodEntryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ws_tx: Option<broadcast::Sender<String>>,
    pub schedules: Arc<MoodScheduleManager>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub reminders: ReminderRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodcheck_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Database
    let db = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations applied");

    let local: Arc<dyn ScheduleStore> = match config.schedule_store_dir.as_deref() {
        Some(dir) => {
            tracing::info!(dir = %dir, "Persisting mood schedules to disk");
            Arc::new(FileScheduleStore::new(dir))
        }
        None => {
            tracing::warn!("SCHEDULE_STORE_DIR not set; mood schedules are kept in memory");
            Arc::new(MemoryScheduleStore::new())
        }
    };

    let schedules = Arc::new(MoodScheduleManager::new(
        local,
        Arc::new(PgMoodEntryStore::new(db)),
        Arc::new(SystemClock),
        ScheduleConfig::from_config(&config),
    ));

    // WebSocket broadcast channel
    let (ws_tx, _) = broadcast::channel::<String>(256);

    let state = AppState {
        config: config.clone(),
        notifier: Arc::new(BroadcastDispatcher::new(Some(ws_tx.clone()))),
        ws_tx: Some(ws_tx),
        schedules,
        reminders: ReminderRegistry::new(),
    };

    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/ws", get(handlers::ws::ws_handler));

    let protected_routes = Router::new()
        // Mood entries
        .route(
            "/api/mood-entries",
            post(handlers::mood_entries::create_mood_entry),
        )
        .route(
            "/api/mood-entries",
            get(handlers::mood_entries::list_mood_entries),
        )
        .route(
            "/api/mood-entries/export",
            get(handlers::mood_entries::export_mood_entries),
        )
        // Schedule
        .route(
            "/api/mood-schedule/today",
            get(handlers::schedule::get_today),
        )
        .route(
            "/api/mood-schedule/check",
            post(handlers::schedule::run_check),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let allowed_origins: Vec<axum::http::HeaderValue> = std::iter::once(&state.config.frontend_url)
        .chain(state.config.cors_extra_origins.iter())
        .filter_map(|origin| match origin.parse::<axum::http::HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
