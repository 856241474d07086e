mod handlers;
mod live;
pub mod middleware;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;
use crate::live::LiveHub;
use crate::tracker::{TrackerClient, TrackerConfig};

pub use middleware::{RateLimiter, SecurityConfig};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hub: LiveHub,
    pub tracker: TrackerClient,
}

impl AppState {
    /// State with the tracker configured from the environment.
    pub fn new(db: Database) -> Self {
        Self::with_tracker(db, TrackerConfig::from_env())
    }

    pub fn with_tracker(db: Database, tracker: TrackerConfig) -> Self {
        Self {
            db,
            hub: LiveHub::new(),
            tracker: TrackerClient::new(tracker),
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for LiveHub {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}

/// Router with security disabled, for local use and tests.
pub fn create_router(db: Database) -> Router {
    create_router_with_config(db, SecurityConfig::disabled())
}

pub fn create_router_with_config(db: Database, security: SecurityConfig) -> Router {
    create_app(AppState::new(db), security)
}

pub fn create_app(state: AppState, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Estimates
        .route(
            "/estimates",
            get(handlers::list_estimates).post(handlers::create_estimate),
        )
        .route(
            "/estimates/{id}",
            get(handlers::get_estimate)
                .put(handlers::update_estimate)
                .delete(handlers::delete_estimate),
        )
        .route("/estimates/{id}/totals", get(handlers::get_totals))
        // Tree edits
        .route(
            "/estimates/{id}/nodes",
            post(handlers::add_node)
                .patch(handlers::update_node)
                .delete(handlers::delete_node),
        )
        // Drafts
        .route(
            "/estimates/{id}/drafts",
            get(handlers::list_drafts).post(handlers::create_draft),
        )
        .route(
            "/estimates/{id}/drafts/{draft_id}",
            get(handlers::get_draft).delete(handlers::delete_draft),
        )
        // Live channel
        .route("/estimates/{id}/live", get(live::live_socket))
        // Issue tracker
        .route("/tracker/issues", post(handlers::create_tracker_issue))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::auth_middleware,
        ))
        // Health stays reachable without a key
        .route("/health", get(handlers::health));

    let mut app = Router::new()
        .route("/", get(handlers::index))
        .nest("/api", api);

    if let Some(limiter) = security.rate_limiter.clone() {
        app = app.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(security.cors_origins.as_deref())),
    )
    .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}
