//! Portico Server - guarded workflow backend
//!
//! A standalone Rust backend for Portico, providing:
//! - RESTful HTTP API via axum
//! - Per-session identity snapshots streamed over SSE
//! - Gate redirects (`303 See Other`) on guarded workflow routes
//! - SQLite-backed local record store, or a remote record service
//!
//! This crate can be used standalone or embedded (e.g. by `portico-cli`).

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use portico_core::db::Database;
use portico_core::gate::ViewGuards;
use portico_core::identity::LocalIdentityProvider;
use portico_core::records::{HttpRecordStore, RecordStore};
use portico_core::state::{AppState, AppStateInner};
use portico_core::store::SqliteRecordStore;
use portico_core::workflow::SchemaRegistry;

/// Configuration for the Portico backend server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Directory of extra workflow YAML files loaded on top of the built-ins.
    pub workflows_dir: Option<String>,
    /// Accounts file for the local identity provider.
    pub accounts_path: Option<String>,
    /// YAML file of view guards layered over the defaults.
    pub guards_path: Option<String>,
    /// Base URL of a remote record service. When unset, records live in
    /// the local database.
    pub record_store_url: Option<String>,
    /// Optional path to static frontend files.
    /// When set, the server serves these files for all non-API routes.
    pub static_dir: Option<String>,
    /// Sessions unused for this many seconds are dropped.
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3310,
            db_path: "portico.db".to_string(),
            workflows_dir: None,
            accounts_path: None,
            guards_path: None,
            record_store_url: None,
            static_dir: None,
            session_idle_secs: 30 * 60,
        }
    }
}

/// Create a shared `AppState` from the server configuration.
pub async fn create_app_state(config: &ServerConfig) -> Result<AppState, String> {
    let db = Database::open(&config.db_path)
        .map_err(|e| format!("Failed to open database: {}", e))?;

    let accounts = match &config.accounts_path {
        Some(path) => LocalIdentityProvider::from_file(path)?,
        None => LocalIdentityProvider::new(Vec::new()),
    };
    let accounts = Arc::new(accounts);
    tracing::info!("Loaded {} local accounts", accounts.account_count());

    let mut schemas = SchemaRegistry::builtin();
    if let Some(dir) = &config.workflows_dir {
        let loaded = schemas
            .load_dir(dir)
            .map_err(|e| format!("Failed to load workflows from {}: {}", dir, e))?;
        tracing::info!("Loaded {} workflows from {}", loaded, dir);
    }

    let mut guards = ViewGuards::defaults();
    if let Some(path) = &config.guards_path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read guards file '{}': {}", path, e))?;
        guards.extend(ViewGuards::from_yaml(&content)?);
        tracing::info!("Loaded view guards from {}", path);
    }

    let record_store: Arc<dyn RecordStore> = match &config.record_store_url {
        Some(url) => {
            tracing::info!("Using remote record store at {}", url);
            Arc::new(HttpRecordStore::new(url))
        }
        None => {
            let local = Arc::new(SqliteRecordStore::new(db.clone(), accounts.clone()));
            accounts
                .seed_profiles(&local)
                .await
                .map_err(|e| format!("Failed to seed profiles: {}", e))?;
            local
        }
    };

    let state = AppStateInner::new(schemas, guards, accounts, record_store)
        .with_session_idle_timeout(Duration::from_secs(config.session_idle_secs));
    Ok(Arc::new(state))
}

/// Start the Portico backend server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing; the CLI installs its own subscriber first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "portico_server=info,portico_core=info,tower_http=info".into()
            }),
        )
        .try_init();

    tracing::info!(
        "Starting Portico server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config).await?;

    start_server_with_state(config, state).await
}

/// Router with every API route, CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let mut app = build_router(state.clone());

    // Serve static frontend files if configured
    if let Some(ref static_dir) = config.static_dir {
        let static_path = std::path::Path::new(static_dir);
        if static_path.is_dir() {
            tracing::info!("Serving static frontend from: {}", static_dir);
            let serve_dir = tower_http::services::ServeDir::new(static_dir)
                .not_found_service(tower_http::services::ServeFile::new(
                    static_path.join("index.html"),
                ));
            app = app.fallback_service(serve_dir);
        } else {
            tracing::warn!(
                "Static directory not found: {}. Frontend won't be served.",
                static_dir
            );
        }
    }

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Portico server listening on {}", local_addr);

    // Drop idle sessions in the background
    let sessions = state.clone();
    tokio::spawn(async move {
        let period = (sessions.sessions.idle_timeout() / 2).max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            sessions.sessions.sweep_expired().await;
        }
    });

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "portico-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
