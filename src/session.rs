use axum::http::{HeaderValue, header::InvalidHeaderValue};
use chrono::Utc;

use crate::{
    error::AppError,
    models::{EmailAddress, LoginInput, User},
    password,
    repository::CredentialState,
    token::{Claims, TokenCodec},
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE_NAME: &str = "cms_session";

/// SessionIssuer
///
/// Exchanges an email and password for a signed session token. Nothing is
/// stored: the token itself is the session.
#[derive(Clone)]
pub struct SessionIssuer {
    credentials: CredentialState,
    tokens: TokenCodec,
}

impl SessionIssuer {
    pub fn new(credentials: CredentialState, tokens: TokenCodec) -> Self {
        Self {
            credentials,
            tokens,
        }
    }

    /// login
    ///
    /// Unknown email and wrong password fail with the same `InvalidCredentials`.
    /// For an unknown email the password is still run through argon2 against a
    /// dummy hash so the two paths cost about the same.
    pub async fn login(&self, input: LoginInput) -> Result<(User, String), AppError> {
        let LoginInput { email, password } = input;
        let credential = self.credentials.find_credential(&email).await?;

        let user = match credential {
            Some(credential) => {
                let stored = credential.password_hash;
                let matched = tokio::task::spawn_blocking(move || {
                    password::verify_password(&password, &stored)
                })
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
                matched.then_some(credential.user)
            }
            None => {
                tokio::task::spawn_blocking(move || password::verify_against_dummy(&password))
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                None
            }
        };

        let Some(user) = user else {
            tracing::warn!(account = %email.fingerprint(), "login rejected");
            return Err(AppError::InvalidCredentials);
        };

        let claims = Claims::for_user(&user, Utc::now(), self.tokens.ttl());
        let token = self
            .tokens
            .sign(&claims)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        tracing::info!(user_id = %user.id, role = %user.role, "session issued");
        Ok((user, token))
    }
}

/// seed_admin
///
/// Creates the first admin account for a fresh deployment. A no-op returning
/// `false` when the email already has an account, so it is safe on every start.
pub async fn seed_admin(
    credentials: &CredentialState,
    email: &EmailAddress,
    password: String,
) -> Result<bool, AppError> {
    if credentials.find_credential(email).await?.is_some() {
        return Ok(false);
    }
    password::validate_password(&password).map_err(|e| AppError::validation(e.to_string()))?;

    let hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let user = credentials
        .create_user(email, "Administrator", "admin", &hash)
        .await?;

    tracing::info!(user_id = %user.id, "admin account seeded");
    Ok(true)
}

/// Build the `HttpOnly` session cookie. `Secure` is added outside local
/// development, where the site is served over HTTPS.
pub fn session_cookie(
    token: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    session_cookie("", 0, secure)
}
