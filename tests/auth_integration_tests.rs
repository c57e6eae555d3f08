use axum::{
    extract::FromRequestParts,
    http::{Method, Request, Uri, header, request::Parts},
};
use chrono::Utc;
use stagehouse_cms::{
    AppError, AppState, InMemoryRepository, MemoryCache, MockMailer,
    auth::AuthUser,
    config::{AppConfig, Env},
    token::{Claims, TokenCodec},
};
use std::sync::Arc;
use uuid::Uuid;

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn create_token(secret: &str, exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: TEST_USER_ID,
        email: "editor@stagehouse.test".to_string(),
        role: "editor".to_string(),
        iat: now - 60,
        exp: now + exp_offset,
    };
    TokenCodec::new(secret, 3600).sign(&claims).unwrap()
}

fn create_app_state(env: Env) -> AppState {
    let config = AppConfig {
        env,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    };
    let repo = Arc::new(InMemoryRepository::new());
    AppState::new(
        repo.clone(),
        repo,
        Arc::new(MemoryCache::new()),
        Arc::new(MockMailer::new()),
        config,
    )
}

/// Helper to get the mutable Parts struct from a generated Request
fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_bearer(parts: &mut Parts, token: &str) {
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
}

fn with_cookie(parts: &mut Parts, token: &str) {
    parts.headers.insert(
        header::COOKIE,
        header::HeaderValue::from_str(&format!("theme=dark; cms_session={token}")).unwrap(),
    );
}

// --- Tests ---

#[tokio::test]
async fn test_auth_success_with_bearer_token() {
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &create_token(TEST_JWT_SECRET, 3600));

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, TEST_USER_ID);
    assert_eq!(user.email, "editor@stagehouse.test");
    assert_eq!(user.role, "editor");
}

#[tokio::test]
async fn test_auth_success_with_session_cookie() {
    let app_state = create_app_state(Env::Local);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_cookie(&mut parts, &create_token(TEST_JWT_SECRET, 3600));

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, TEST_USER_ID);
}

#[tokio::test]
async fn test_auth_failure_with_missing_token() {
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());

    let result = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_auth_failure_with_expired_token() {
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &create_token(TEST_JWT_SECRET, -1));

    let result = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_auth_failure_with_foreign_secret() {
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &create_token("some-other-secret", 3600));

    let result = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_cookie_candidate_wins_even_when_invalid() {
    // Only the first candidate in extraction order is verified: a broken
    // cookie is not rescued by a valid bearer token.
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_cookie(&mut parts, "not-a-token");
    with_bearer(&mut parts, &create_token(TEST_JWT_SECRET, 3600));

    let result = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_bearer_is_ignored_when_cookie_is_valid() {
    let app_state = create_app_state(Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_cookie(&mut parts, &create_token(TEST_JWT_SECRET, 3600));
    with_bearer(&mut parts, "garbage");

    assert!(
        AuthUser::from_request_parts(&mut parts, &app_state)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_user_id_header_is_not_an_identity() {
    let app_state = create_app_state(Env::Local);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&TEST_USER_ID.to_string()).unwrap(),
    );

    let result = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}
