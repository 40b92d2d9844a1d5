pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod store;
pub mod upstream;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;

use auth::SessionKeys;
use config::Config;
use services::{CredentialRefresher, HandshakeCoordinator, SetService, SyncEngine, UserService};
use store::Storage;
use upstream::UpstreamProvider;

/// Shared handles passed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Storage>,
    pub provider: Arc<dyn UpstreamProvider>,
    pub sessions: SessionKeys,
    pub refresher: Arc<CredentialRefresher>,
    pub handshakes: Arc<HandshakeCoordinator>,
    pub sets: Arc<SetService>,
    pub users: Arc<UserService>,
    pub sync: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Storage>, provider: Arc<dyn UpstreamProvider>) -> Self {
        let sessions = SessionKeys::new(config.session_secret.as_bytes());
        let refresher = Arc::new(CredentialRefresher::new(store.clone(), provider.clone()));
        let handshakes = Arc::new(HandshakeCoordinator::new(
            store.clone(),
            provider.clone(),
            config.handshake_ttl,
        ));
        let sets = Arc::new(SetService::new(store.clone(), provider.clone()));
        let users = Arc::new(UserService::new(
            store.clone(),
            sessions.clone(),
            handshakes.clone(),
            refresher.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(store.clone(), provider.clone(), refresher.clone()));

        Self {
            config: Arc::new(config),
            store,
            provider,
            sessions,
            refresher,
            handshakes,
            sets,
            users,
            sync,
        }
    }
}

fn cors(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([routes::middleware::USER_ID_HEADER, routes::middleware::UPSTREAM_TOKEN_HEADER])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("FRONTEND_URL is not a valid origin, cross-origin requests will be refused");
            cors
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sets", get(routes::get_sets).post(routes::create_set))
        .route("/tracks/{id}/like", put(routes::toggle_like))
        .route("/player", get(routes::player))
        .route("/me", get(routes::get_me).patch(routes::update_me))
        .route("/genres", get(routes::genres))
        .route_layer(middleware::from_fn_with_state(state.clone(), routes::require_auth));

    Router::new()
        // Auth
        .route("/signup", post(routes::signup))
        .route("/login", post(routes::login))
        .route("/callback", get(routes::callback))
        .merge(protected)
        // Health check
        .route("/health", get(health_check))
        .layer(cors(&state.config.frontend_url))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
