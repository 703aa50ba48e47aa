mod config;
mod db;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use config::{AppConfig, SessionStoreKind};
use services::auth::GoogleConfig;
use services::identity::PgIdentityProvider;
use services::provisioning::BackendClient;
use services::signup_session::{MemorySignUpSessionStore, PgSignUpSessionStore, SignUpSessionStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let sessions: Arc<dyn SignUpSessionStore> = match config.session_store {
        SessionStoreKind::Postgres => Arc::new(PgSignUpSessionStore::new(pool.clone())),
        SessionStoreKind::Memory => Arc::new(MemorySignUpSessionStore::new()),
    };
    let backend = BackendClient::new(&config.backend).expect("backend client init failed");
    tracing::info!(base_url = %config.backend.base_url, "healthcare backend configured");

    // Google sign-on is optional: routes answer 503 when it is missing.
    let google = GoogleConfig::from_env();
    if google.is_none() {
        tracing::warn!("Google OAuth not configured, social sign-on disabled");
    }

    let mut state =
        state::AppState::new(sessions, Arc::new(PgIdentityProvider::new(pool)), Arc::new(backend), google);
    state.cookie_secure = config::cookie_secure();
    state.admin_api_key = config.admin_api_key.clone();

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, store = ?config.session_store, "healflow listening");
    axum::serve(listener, app).await.expect("server failed");
}
