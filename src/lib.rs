use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core components.
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod password;
pub mod recovery;
pub mod repository;
pub mod session;
pub mod token;

// Collaborators and the HTTP surface.
pub mod handlers;
pub mod mailer;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use cache::{CacheAside, CacheStore, MemoryCache, ValkeyCache};
pub use config::AppConfig;
pub use error::AppError;
pub use mailer::{HttpMailer, LogMailer, MailerState, MockMailer};
pub use recovery::RecoveryCodeManager;
pub use repository::{ContentState, CredentialState, InMemoryRepository, PostgresRepository};
pub use session::SessionIssuer;
pub use token::TokenCodec;

/// ApiDoc
///
/// OpenAPI document for every annotated handler and DTO, served at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::logout, handlers::get_me,
        handlers::reset_request, handlers::reset_verify, handlers::reset_confirm,
        handlers::list_shows, handlers::get_featured_shows, handlers::get_show,
        handlers::create_show, handlers::update_show, handlers::delete_show,
        handlers::list_brands, handlers::create_brand, handlers::delete_brand
    ),
    components(
        schemas(
            models::LoginRequest, models::LoginResponse, models::UserProfile,
            models::ResetRequest, models::ResetVerifyRequest, models::ResetConfirmRequest,
            models::Show, models::CreateShowRequest, models::UpdateShowRequest,
            models::Brand, models::CreateBrandRequest, error::MessageResponse,
        )
    ),
    tags(
        (name = "auth", description = "Sessions and password recovery"),
        (name = "shows", description = "Show listings"),
        (name = "brands", description = "Partner brands")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container handed to every request. All members are cheap
/// to clone (handles behind `Arc`s).
#[derive(Clone)]
pub struct AppState {
    /// Identities, password hashes and recovery codes.
    pub credentials: CredentialState,
    /// Shows and brands.
    pub content: ContentState,
    pub cache: CacheAside,
    pub tokens: TokenCodec,
    pub sessions: SessionIssuer,
    pub recovery: RecoveryCodeManager,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the components together from their collaborators.
    pub fn new(
        credentials: CredentialState,
        content: ContentState,
        cache_store: Arc<dyn CacheStore>,
        mailer: MailerState,
        config: AppConfig,
    ) -> Self {
        let tokens = TokenCodec::new(&config.jwt_secret, config.token_ttl_seconds);
        let sessions = SessionIssuer::new(credentials.clone(), tokens.clone());
        let recovery = RecoveryCodeManager::from_config(credentials.clone(), mailer, &config);

        Self {
            credentials,
            content,
            cache: CacheAside::new(cache_store),
            tokens,
            sessions,
            recovery,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for TokenCodec {
    fn from_ref(app_state: &AppState) -> TokenCodec {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for CacheAside {
    fn from_ref(app_state: &AppState) -> CacheAside {
        app_state.cache.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Gate for the authenticated and admin routers. Extracting `AuthUser` runs
/// the token check; on failure the extractor's rejection (401) is returned and
/// the handler never runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routers, the gate layer and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: No middleware applied.
        .merge(public::public_routes())
        // Authenticated Routes: gated.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Admin Routes: gated; the role check happens in the handlers.
        .merge(
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, URI and the `x-request-id` so every log line
/// of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
