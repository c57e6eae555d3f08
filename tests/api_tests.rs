use reqwest::{StatusCode, header};
use serde_json::{Value, json};
use stagehouse_cms::{
    AppConfig, AppError, AppState, CredentialState, InMemoryRepository, MemoryCache, MockMailer,
    create_router, models::EmailAddress, password, repository::CredentialStore, session,
};
use std::sync::Arc;
use tokio::net::TcpListener;

const EMAIL: &str = "editor@stagehouse.test";
const PASSWORD: &str = "correct-horse-42";

#[derive(Clone)]
pub struct TestApp {
    pub address: String,
    pub repo: Arc<InMemoryRepository>,
    pub mailer: Arc<MockMailer>,
    pub client: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let hash = password::hash_password(PASSWORD).unwrap();
    repo.create_user(&EmailAddress::parse(EMAIL).unwrap(), "Editor", "editor", &hash)
        .await
        .unwrap();

    let mailer = Arc::new(MockMailer::new());
    let state = AppState::new(
        repo.clone(),
        repo.clone(),
        Arc::new(MemoryCache::new()),
        mailer.clone(),
        AppConfig::default(),
    );
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        repo,
        mailer,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(&body)
            .send()
            .await
            .expect("req fail")
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post("/auth/login", json!({"email": email, "password": password}))
            .await
    }
}

fn set_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie present")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app().await;
    let doc: Value = app
        .client
        .get(format!("{}/api-docs/openapi.json", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/auth/login"].is_object());
    assert!(doc["paths"]["/shows/{id}"].is_object());
}

#[tokio::test]
async fn test_login_sets_cookie_and_returns_profile() {
    let app = spawn_app().await;

    // Mixed case and padding are normalized.
    let response = app.login("  Editor@StageHouse.test ", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("cms_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=172800"));
    assert!(!cookie.contains("Secure"), "local development runs over http");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], EMAIL);
    assert_eq!(body["user"]["role"], "editor");
    assert!(body["user"].get("password_hash").is_none());
    let token = body["token"].as_str().unwrap();
    assert!(cookie.contains(token));
}

#[tokio::test]
async fn test_wrong_password_and_unknown_email_are_indistinguishable() {
    let app = spawn_app().await;

    let wrong_password = app.login(EMAIL, "not-the-password").await;
    let unknown_email = app.login("ghost@stagehouse.test", "not-the-password").await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    assert!(wrong_password.headers().get(header::SET_COOKIE).is_none());
    assert!(unknown_email.headers().get(header::SET_COOKIE).is_none());

    let a = wrong_password.text().await.unwrap();
    let b = unknown_email.text().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a, r#"{"message":"Invalid email or password"}"#);
}

#[tokio::test]
async fn test_me_accepts_cookie_and_bearer() {
    let app = spawn_app().await;
    let login = app.login(EMAIL, PASSWORD).await;
    let cookie = set_cookie(&login);
    let token = login.json::<Value>().await.unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string();

    let session = cookie.split(';').next().unwrap().to_string();
    let via_cookie = app
        .client
        .get(format!("{}/auth/me", app.address))
        .header(header::COOKIE, session)
        .send()
        .await
        .unwrap();
    assert_eq!(via_cookie.status(), StatusCode::OK);
    let profile: Value = via_cookie.json().await.unwrap();
    assert_eq!(profile["email"], EMAIL);
    assert_eq!(profile["name"], "Editor");

    let via_bearer = app
        .client
        .get(format!("{}/auth/me", app.address))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(via_bearer.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = spawn_app().await;
    let response = app.post("/auth/logout", json!({})).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("cms_session=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_reset_request_answers_the_same_for_unknown_accounts() {
    let app = spawn_app().await;

    let known = app
        .post("/auth/reset/request", json!({"email": EMAIL}))
        .await;
    let unknown = app
        .post("/auth/reset/request", json!({"email": "ghost@stagehouse.test"}))
        .await;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    let a = known.text().await.unwrap();
    assert_eq!(a, unknown.text().await.unwrap());
    assert_eq!(
        a,
        r#"{"message":"If the account exists, a reset code has been sent"}"#
    );
    assert_eq!(app.mailer.wait_for_sent(1).await.len(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_reset_flow_end_to_end() {
    let app = spawn_app().await;

    app.post("/auth/reset/request", json!({"email": EMAIL}))
        .await;
    app.mailer.wait_for_sent(1).await;
    let code = app.mailer.last_code_for(EMAIL).unwrap();

    let verify = app
        .post("/auth/reset/verify", json!({"email": EMAIL, "code": code}))
        .await;
    assert_eq!(verify.status(), StatusCode::OK);

    let confirm = app
        .post(
            "/auth/reset/confirm",
            json!({"email": EMAIL, "code": code, "newPassword": "newpassword123"}),
        )
        .await;
    assert_eq!(confirm.status(), StatusCode::OK);

    assert_eq!(app.login(EMAIL, "newpassword123").await.status(), StatusCode::OK);
    assert_eq!(
        app.login(EMAIL, PASSWORD).await.status(),
        StatusCode::UNAUTHORIZED
    );

    // Consumed: a replay fails closed.
    let replay = app
        .post(
            "/auth/reset/confirm",
            json!({"email": EMAIL, "code": code, "newPassword": "yet-another-pass"}),
        )
        .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        replay.text().await.unwrap(),
        r#"{"message":"Invalid or expired code"}"#
    );
}

#[tokio::test]
async fn test_confirm_rejects_weak_password_before_touching_code() {
    let app = spawn_app().await;
    app.post("/auth/reset/request", json!({"email": EMAIL}))
        .await;
    app.mailer.wait_for_sent(1).await;
    let code = app.mailer.last_code_for(EMAIL).unwrap();

    let response = app
        .post(
            "/auth/reset/confirm",
            json!({"email": EMAIL, "code": code, "newPassword": "short"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "password must be at least 8 characters");

    let record = app.repo.recovery_code(EMAIL).unwrap();
    assert_eq!(record.attempts_remaining, 5);
    assert!(record.consumed_at.is_none());
}

#[tokio::test]
async fn test_verify_without_request_fails_closed() {
    let app = spawn_app().await;
    let response = app
        .post("/auth/reset/verify", json!({"email": EMAIL, "code": "123456"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid or expired code");
}

#[tokio::test]
async fn test_seeded_admin_can_log_in_once_created() {
    let app = spawn_app().await;
    let credentials: CredentialState = app.repo.clone();
    let admin = EmailAddress::parse("owner@stagehouse.test").unwrap();

    let weak = session::seed_admin(&credentials, &admin, "short".into()).await;
    assert!(matches!(weak, Err(AppError::Validation(_))));

    assert!(
        session::seed_admin(&credentials, &admin, "first-admin-pass".into())
            .await
            .unwrap()
    );
    // A restart with the same variables leaves the account alone.
    assert!(
        !session::seed_admin(&credentials, &admin, "other-admin-pass".into())
            .await
            .unwrap()
    );

    let response = app.login("owner@stagehouse.test", "first-admin-pass").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["role"], "admin");
}
