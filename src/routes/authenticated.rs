use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Endpoints for any signed-in editor or admin. The gate layer added in
/// `create_router` rejects the request with 401 before a handler (and so
/// before any store or cache access) runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /auth/me
        // Profile of the identity named by the session token.
        .route("/auth/me", get(handlers::get_me))
        // POST /shows
        // Creates a show and invalidates the cached show lists.
        .route("/shows", post(handlers::create_show))
        // PUT /shows/{id}
        // Partial update; invalidates the lists and the detail entry.
        .route("/shows/{id}", put(handlers::update_show))
}
