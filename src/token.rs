use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;

/// Claims
///
/// Identity claims carried inside a session token. They are never persisted:
/// every authenticated request re-derives them by verifying the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    pub email: String,
    /// RBAC role, `admin` or `editor`.
    pub role: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expires-at, unix seconds. Tokens are rejected once this is in the past.
    pub exp: i64,
}

impl Claims {
    /// Builds the claims for `user`, valid for `ttl` starting at `issued_at`.
    pub fn for_user(user: &User, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            sub: user.id,
            email: user.email.clone(),
            role: user.role.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }
}

/// Why a token was rejected. Callers collapse every variant into a plain 401;
/// the distinction only feeds the logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not shaped like a compact token at all.
    #[error("malformed token")]
    Malformed,
    /// The content does not authenticate under the server secret.
    #[error("bad token signature")]
    BadSignature,
    /// Authentic, but past its `exp`.
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken | ErrorKind::MissingRequiredClaim(_) => TokenError::Malformed,
            // Tampered header, payload or signature bytes all land here: the
            // signature covers the raw encoded segments.
            _ => TokenError::BadSignature,
        }
    }
}

/// TokenCodec
///
/// Signs and verifies HS256 session tokens with the server-held secret.
/// Pure: no I/O, no shared mutable state.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("TokenCodec").field("ttl", &self.ttl).finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Validity window applied to freshly issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Checks the signature (constant time) before looking at the claims, then
    /// rejects tokens whose `exp` has passed.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}
