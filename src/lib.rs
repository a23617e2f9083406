//! SAML 2.0 SSO bridge.
//!
//! Registers IdPs per tenant, builds SP-initiated login redirects, verifies
//! IdP responses and turns their claims into short-lived RS256 tokens.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod config;
pub mod db;
pub mod models;
#[cfg(feature = "server")]
pub mod observability;
pub mod routes;
pub mod saml;
pub mod services;
pub mod validation;

/// Failures while assembling the application at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Signing key error: {0}")]
    SigningKeys(#[from] services::SigningKeyError),

    #[error("Service initialization failed: {0}")]
    Services(#[from] saml::SamlError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::BridgeConfig>,
    pub db: Arc<db::DbPool>,
    pub services: services::Services,
}

impl AppState {
    /// Open storage, run migrations when configured, load signing keys and
    /// build the services.
    pub async fn new(config: config::BridgeConfig) -> Result<Self, StartupError> {
        saml::ensure_initialized();

        let db = Arc::new(db::DbPool::from_config(&config.database).await?);
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }
        tracing::info!(backend = db.backend_name(), "Storage ready");

        let signing_keys = Arc::new(services::StaticSigningKeys::from_config(&config.signing)?);
        let services = services::Services::new(db.clone(), &config.saml, signing_keys)?;

        Ok(Self {
            config: Arc::new(config),
            db,
            services,
        })
    }

    /// State around already constructed services.
    pub fn from_services(config: config::BridgeConfig, services: services::Services) -> Self {
        Self {
            config: Arc::new(config),
            db: services.db.clone(),
            services,
        }
    }
}

/// The full router with tracing, body limit and request timeout layers.
pub fn build_app(config: &config::BridgeConfig, state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .nest("/recipe/saml", saml_routes());
    with_layers(router, &config.server).with_state(state)
}

fn with_layers(router: Router<AppState>, server: &config::ServerConfig) -> Router<AppState> {
    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.timeout_secs),
        ))
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
}

fn saml_routes() -> Router<AppState> {
    use routes::saml as handlers;

    Router::new()
        .route(
            "/clients",
            put(handlers::create_or_update).get(handlers::get),
        )
        .route("/clients/list", get(handlers::list))
        .route("/clients/remove", post(handlers::remove))
        .route("/clients/refresh", post(handlers::refresh))
        .route("/login", post(handlers::login))
        .route("/callback", post(handlers::callback))
        .route("/token", post(handlers::token))
        .route("/user", post(handlers::user_info))
        .route("/legacy/authorize", get(handlers::legacy_authorize))
        .route("/legacy/callback", post(handlers::legacy_callback))
        .route("/legacy/token", post(handlers::legacy_token))
        .route("/legacy/userinfo", get(handlers::legacy_user_info))
}
