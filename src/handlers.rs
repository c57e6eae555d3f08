use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, MessageResponse},
    models::{
        Brand, CreateBrandRequest, CreateShowRequest, LoginRequest, LoginResponse, ResetConfirmRequest,
        ResetRequest, ResetVerifyRequest, Show, UpdateShowRequest, UserProfile,
    },
    session::{clear_session_cookie, session_cookie},
};
use axum::{
    Json,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::time::Duration;
use uuid::Uuid;

// --- Cache keys and lifetimes ---

pub const SHOWS_ALL_KEY: &str = "shows:all";
pub const SHOWS_FEATURED_KEY: &str = "shows:featured";
pub const BRANDS_ALL_KEY: &str = "brands:all";

pub const SHOWS_LIST_TTL: Duration = Duration::from_secs(60);
pub const SHOW_DETAIL_TTL: Duration = Duration::from_secs(120);
pub const BRANDS_TTL: Duration = Duration::from_secs(120);

/// Number of shows returned by `/shows/featured`.
pub const FEATURED_LIMIT: i64 = 3;

pub fn show_key(id: Uuid) -> String {
    format!("shows:{id}")
}

// --- Extractors ---

/// AppJson
///
/// `Json<T>` whose rejection is an `AppError::Validation`, so malformed bodies
/// get the same `{"message": ...}` shape as every other error.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::validation(rejection.body_text())),
        }
    }
}

// --- Auth handlers ---

/// login
///
/// [Public Route] Exchanges email and password for a session token. The token
/// is returned in the body (for bearer clients) and as the `cms_session`
/// cookie.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid email or password", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = payload.validate()?;
    let (user, token) = state.sessions.login(input).await?;

    let cookie = session_cookie(
        &token,
        state.tokens.ttl().num_seconds(),
        state.config.secure_cookies(),
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            user: UserProfile::from(user),
            token,
        }),
    ))
}

/// logout
///
/// [Public Route] Clears the session cookie. Tokens are not tracked server
/// side, so a copied bearer token stays valid until it expires.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Session cookie cleared")),
    tag = "auth"
)]
pub async fn logout(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let cookie = clear_session_cookie(state.config.secure_cookies())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]))
}

/// get_me
///
/// [Authenticated Route] Profile of the identity named by the token.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Unauthorized", body = MessageResponse),
        (status = 404, description = "User no longer exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn get_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state
        .credentials
        .get_user(auth_user.id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

/// reset_request
///
/// [Public Route] Issues a recovery code. Answers identically whether or not
/// the account exists.
#[utoipa::path(
    post,
    path = "/auth/reset/request",
    request_body = ResetRequest,
    responses((status = 200, description = "Acknowledged", body = MessageResponse)),
    tag = "auth"
)]
pub async fn reset_request(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = payload.validate()?;
    state.recovery.request(&email).await?;
    Ok(Json(MessageResponse::new(
        "If the account exists, a reset code has been sent",
    )))
}

/// reset_verify
///
/// [Public Route] Checks a recovery code without consuming it.
#[utoipa::path(
    post,
    path = "/auth/reset/verify",
    request_body = ResetVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = MessageResponse),
        (status = 400, description = "Invalid or expired code", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn reset_verify(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetVerifyRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let input = payload.validate()?;
    state.recovery.verify(&input).await?;
    Ok(Json(MessageResponse::new("Code verified")))
}

/// reset_confirm
///
/// [Public Route] Consumes the code and sets the new password.
#[utoipa::path(
    post,
    path = "/auth/reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired code, or weak password", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn reset_confirm(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetConfirmRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let input = payload.validate()?;
    state.recovery.confirm(input).await?;
    Ok(Json(MessageResponse::new("Password updated")))
}

// --- Shows ---

/// list_shows
///
/// [Public Route] All shows ordered by start time. Cached for 60 seconds.
#[utoipa::path(
    get,
    path = "/shows",
    responses(
        (status = 200, description = "Shows", body = [Show]),
        (status = 503, description = "Store unavailable", body = MessageResponse)
    ),
    tag = "shows"
)]
pub async fn list_shows(State(state): State<AppState>) -> Result<Json<Vec<Show>>, AppError> {
    let shows = state
        .cache
        .get_or_load(SHOWS_ALL_KEY, SHOWS_LIST_TTL, || state.content.list_shows())
        .await?;
    Ok(Json(shows))
}

/// get_featured_shows
///
/// [Public Route] The next featured shows, at most `FEATURED_LIMIT`.
#[utoipa::path(
    get,
    path = "/shows/featured",
    responses((status = 200, description = "Featured shows", body = [Show])),
    tag = "shows"
)]
pub async fn get_featured_shows(
    State(state): State<AppState>,
) -> Result<Json<Vec<Show>>, AppError> {
    let shows = state
        .cache
        .get_or_load(SHOWS_FEATURED_KEY, SHOW_DETAIL_TTL, || {
            state.content.list_featured_shows(FEATURED_LIMIT)
        })
        .await?;
    Ok(Json(shows))
}

/// get_show
///
/// [Public Route] A single show. Misses for unknown ids are not cached.
#[utoipa::path(
    get,
    path = "/shows/{id}",
    params(("id" = Uuid, Path, description = "Show id")),
    responses(
        (status = 200, description = "Show", body = Show),
        (status = 404, description = "Not found", body = MessageResponse)
    ),
    tag = "shows"
)]
pub async fn get_show(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Show>, AppError> {
    let key = show_key(id);
    if let Some(show) = state.cache.get::<Show>(&key).await {
        return Ok(Json(show));
    }

    let show = state
        .content
        .get_show(id)
        .await?
        .ok_or(AppError::NotFound("show"))?;
    state.cache.set(&key, &show, SHOW_DETAIL_TTL).await;
    Ok(Json(show))
}

/// create_show
///
/// [Authenticated Route] Adds a show, then drops the cached lists.
#[utoipa::path(
    post,
    path = "/shows",
    request_body = CreateShowRequest,
    responses(
        (status = 201, description = "Created", body = Show),
        (status = 400, description = "Invalid payload", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = MessageResponse)
    ),
    tag = "shows"
)]
pub async fn create_show(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateShowRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload.validate()?;
    let show = state.content.create_show(payload).await?;
    state
        .cache
        .invalidate(&[SHOWS_ALL_KEY, SHOWS_FEATURED_KEY])
        .await;

    tracing::info!(show_id = %show.id, user_id = %auth_user.id, "show created");
    Ok((StatusCode::CREATED, Json(show)))
}

/// update_show
///
/// [Authenticated Route] Partial update. Invalidates the lists and the
/// detail entry.
#[utoipa::path(
    put,
    path = "/shows/{id}",
    params(("id" = Uuid, Path, description = "Show id")),
    request_body = UpdateShowRequest,
    responses(
        (status = 200, description = "Updated", body = Show),
        (status = 404, description = "Not found", body = MessageResponse)
    ),
    tag = "shows"
)]
pub async fn update_show(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateShowRequest>,
) -> Result<Json<Show>, AppError> {
    let payload = payload.validate()?;
    let show = state
        .content
        .update_show(id, payload)
        .await?
        .ok_or(AppError::NotFound("show"))?;

    let detail = show_key(id);
    state
        .cache
        .invalidate(&[SHOWS_ALL_KEY, SHOWS_FEATURED_KEY, detail.as_str()])
        .await;

    tracing::info!(show_id = %id, user_id = %auth_user.id, "show updated");
    Ok(Json(show))
}

/// delete_show
///
/// [Admin Route] Removes a show.
#[utoipa::path(
    delete,
    path = "/shows/{id}",
    params(("id" = Uuid, Path, description = "Show id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an admin", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    ),
    tag = "shows"
)]
pub async fn delete_show(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth_user.require_admin()?;

    if !state.content.delete_show(id).await? {
        return Err(AppError::NotFound("show"));
    }
    let detail = show_key(id);
    state
        .cache
        .invalidate(&[SHOWS_ALL_KEY, SHOWS_FEATURED_KEY, detail.as_str()])
        .await;

    tracing::info!(show_id = %id, user_id = %auth_user.id, "show deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- Brands ---

/// list_brands
///
/// [Public Route] Partner brands by name. Cached for 120 seconds.
#[utoipa::path(
    get,
    path = "/brands",
    responses((status = 200, description = "Brands", body = [Brand])),
    tag = "brands"
)]
pub async fn list_brands(State(state): State<AppState>) -> Result<Json<Vec<Brand>>, AppError> {
    let brands = state
        .cache
        .get_or_load(BRANDS_ALL_KEY, BRANDS_TTL, || state.content.list_brands())
        .await?;
    Ok(Json(brands))
}

/// create_brand
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/brands",
    request_body = CreateBrandRequest,
    responses(
        (status = 201, description = "Created", body = Brand),
        (status = 403, description = "Not an admin", body = MessageResponse)
    ),
    tag = "brands"
)]
pub async fn create_brand(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateBrandRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require_admin()?;
    let payload = payload.validate()?;

    let brand = state.content.create_brand(payload).await?;
    state.cache.invalidate(&[BRANDS_ALL_KEY]).await;

    tracing::info!(brand_id = %brand.id, "brand created");
    Ok((StatusCode::CREATED, Json(brand)))
}

/// delete_brand
///
/// [Admin Route]
#[utoipa::path(
    delete,
    path = "/brands/{id}",
    params(("id" = Uuid, Path, description = "Brand id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = MessageResponse)
    ),
    tag = "brands"
)]
pub async fn delete_brand(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth_user.require_admin()?;

    if !state.content.delete_brand(id).await? {
        return Err(AppError::NotFound("brand"));
    }
    state.cache.invalidate(&[BRANDS_ALL_KEY]).await;

    tracing::info!(brand_id = %id, "brand deleted");
    Ok(StatusCode::NO_CONTENT)
}
