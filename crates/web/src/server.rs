//! HTTP server: shared state, router and startup

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use vboxdash_common::{InstanceStore, SqliteStore};
use vboxdash_host::{EnvironmentProber, HostConfig, ScriptExecutor, ScriptRunner};

use crate::auth::{IdentityProvider, JwtIdentityProvider, SupabaseIdentityProvider};
use crate::config::{AuthMode, DashboardConfig, StoreBackend};
use crate::handlers;
use crate::supabase::{SupabaseSettings, SupabaseStore};

/// Hands out a store for an authenticated caller
#[derive(Clone)]
pub enum StoreProvider {
    /// One store shared by every caller; rows are filtered by user id.
    Shared(Arc<dyn InstanceStore>),
    /// A PostgREST store bound to each caller's access token.
    Supabase(SupabaseSettings),
}

impl StoreProvider {
    pub fn for_token(&self, token: &str) -> Arc<dyn InstanceStore> {
        match self {
            Self::Shared(store) => store.clone(),
            Self::Supabase(settings) => Arc::new(SupabaseStore::new(settings.clone(), token)),
        }
    }
}

/// State shared by all handlers
pub struct AppState {
    pub prober: EnvironmentProber,
    pub runner: Arc<dyn ScriptRunner>,
    pub identity: Arc<dyn IdentityProvider>,
    pub stores: StoreProvider,
}

impl AppState {
    pub fn new(
        host: HostConfig,
        runner: Arc<dyn ScriptRunner>,
        identity: Arc<dyn IdentityProvider>,
        stores: StoreProvider,
    ) -> Self {
        Self {
            prober: EnvironmentProber::new(host),
            runner,
            identity,
            stores,
        }
    }

    /// Wire up the real executor, identity provider and store from configuration.
    pub fn from_config(config: &DashboardConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let host = config.host_config();
        let client = reqwest::Client::new();

        let supabase = || {
            SupabaseSettings::new(
                client.clone(),
                config.store.supabase_url.as_deref().unwrap_or_default(),
                config.store.supabase_anon_key.as_deref().unwrap_or_default(),
            )
        };

        let stores = match config.store.backend {
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&config.store.sqlite_path)?;
                StoreProvider::Shared(Arc::new(store))
            }
            StoreBackend::Supabase => StoreProvider::Supabase(supabase()),
        };

        let identity: Arc<dyn IdentityProvider> = match config.auth.mode {
            AuthMode::Jwt => Arc::new(JwtIdentityProvider::new(
                config.auth.jwt_secret.as_deref().unwrap_or_default(),
                config.auth.jwt_audience.as_deref(),
            )),
            AuthMode::Supabase => {
                let settings = supabase();
                Arc::new(SupabaseIdentityProvider::new(
                    settings.client,
                    &settings.base_url,
                    &settings.anon_key,
                ))
            }
        };

        let runner = Arc::new(ScriptExecutor::new(host.clone()));
        Ok(Self::new(host, runner, identity, stores))
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/environment/check", get(handlers::environment_check))
        .route("/api/environment/status", get(handlers::environment_status))
        .route("/api/servers", get(handlers::list_servers))
        .route("/api/servers/create", post(handlers::create_server))
        .route("/api/servers/:id", get(handlers::get_server))
        .route("/api/servers/:id/clone", post(handlers::clone_server))
        .route("/api/servers/:id/delete", post(handlers::delete_server))
        .route("/api/servers/:id/stop", post(handlers::stop_server))
        .route("/api/servers/:id/start", post(handlers::start_server))
        .route("/api/servers/:id/retry-script", post(handlers::retry_script))
        .route("/api/servers/:id/services/install", post(handlers::install_service))
        .route("/api/servers/:id/users/create", post(handlers::add_user))
        .route("/api/servers/:id/snapshots/create", post(handlers::create_snapshot))
        .route("/api/servers/:id/snapshots/restore", post(handlers::restore_snapshot))
        .route("/api/servers/:id/metrics", get(handlers::metrics))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn serve(config: DashboardConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    info!(
        "Scripts directory: {} (platform: {})",
        config.scripts_dir.display(),
        state.prober.config().platform
    );

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("VBoxDash API listening on http://{}", config.listen);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
