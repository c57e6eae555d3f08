use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, post},
};

/// Admin Router Module
///
/// Destructive and catalogue-level writes. Wrapped in the same gate layer as
/// the authenticated routes; each handler then checks for the `admin` role
/// and answers 403 otherwise.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // DELETE /shows/{id}
        .route("/shows/{id}", delete(handlers::delete_show))
        // POST /brands
        // Brands change rarely; only admins curate them.
        .route("/brands", post(handlers::create_brand))
        // DELETE /brands/{id}
        .route("/brands/{id}", delete(handlers::delete_brand))
}
