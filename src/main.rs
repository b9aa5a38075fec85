use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod openrouter_client;
mod services;

// Shared application state: the database pool and the dependency-injected
// text-generation client.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub ai_client: Option<openrouter_client::OpenRouterClient>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Create the database connection pool
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // Initialize the OpenRouter client if an API key is provided
    let ai_client = match std::env::var("OPENROUTER_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing OpenRouter text-generation client...");
            Some(openrouter_client::OpenRouterClient::new(api_key))
        }
        _ => {
            tracing::warn!("OPENROUTER_API_KEY not found. AI chat features will be disabled.");
            None
        }
    };

    // Create the shared state
    let shared_state = Arc::new(AppState { db_pool, ai_client });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::products::product_routes())
        .merge(handlers::opportunities::opportunity_routes())
        .merge(handlers::featured::featured_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::users::user_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

// Logging configuration: env-filter with JSON output for production and
// human-readable output for development.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,directory_server=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,directory_server=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Directory server starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    let openrouter_configured = std::env::var("OPENROUTER_API_KEY").is_ok();
    tracing::info!(
        "Configuration - Database: {}, OpenRouter: {}",
        if db_configured { "ok" } else { "missing" },
        if openrouter_configured { "ok" } else { "missing" }
    );

    Ok(())
}

// API status endpoint
async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let ai_status = if state.ai_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "text_generation": ai_status,
        },
    }))
}
