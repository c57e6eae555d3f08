use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. Reads here go through the cache;
/// the recovery endpoints never reveal whether an account exists.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for the load balancer. Touches neither store nor cache.
        .route("/health", get(|| async { "ok" }))
        // --- Session ---
        // POST /auth/login
        // Issues a session token (body + cookie).
        .route("/auth/login", post(handlers::login))
        // POST /auth/logout
        // Clears the session cookie.
        .route("/auth/logout", post(handlers::logout))
        // --- Password recovery ---
        .route("/auth/reset/request", post(handlers::reset_request))
        .route("/auth/reset/verify", post(handlers::reset_verify))
        .route("/auth/reset/confirm", post(handlers::reset_confirm))
        // --- Portfolio reads (cache-aside) ---
        // GET /shows
        .route("/shows", get(handlers::list_shows))
        // GET /shows/featured
        // Static segment; takes precedence over `/shows/{id}`.
        .route("/shows/featured", get(handlers::get_featured_shows))
        // GET /shows/{id}
        .route("/shows/{id}", get(handlers::get_show))
        // GET /brands
        .route("/brands", get(handlers::list_brands))
}
