use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::ROLE_ADMIN,
    session::SESSION_COOKIE_NAME,
    token::{Claims, TokenCodec, TokenError},
};

/// TokenSource
///
/// One place a session token may travel. Requests are probed in
/// [`EXTRACTION_ORDER`]; the first source that yields a candidate wins and no
/// other source is consulted, even if that candidate later fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// The `cms_session` cookie set by `/auth/login`.
    Cookie,
    /// `Authorization: Bearer <token>`.
    AuthorizationBearer,
}

pub const EXTRACTION_ORDER: [TokenSource; 2] =
    [TokenSource::Cookie, TokenSource::AuthorizationBearer];

impl TokenSource {
    pub fn extract(self, headers: &HeaderMap) -> Option<String> {
        match self {
            TokenSource::Cookie => extract_cookie_token(headers),
            TokenSource::AuthorizationBearer => extract_bearer_token(headers),
        }
    }
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    // A request may carry several Cookie headers.
    for header in headers.get_all(header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME {
                let val = val.trim();
                return (!val.is_empty()).then(|| val.to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Finds the first candidate token in [`EXTRACTION_ORDER`].
pub fn find_token(headers: &HeaderMap) -> Option<(TokenSource, String)> {
    EXTRACTION_ORDER
        .iter()
        .find_map(|source| source.extract(headers).map(|token| (*source, token)))
}

/// authenticate
///
/// The request gate. Pure with respect to the store and the cache: a request
/// without a valid token is rejected before either is touched.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenCodec) -> Result<Claims, AppError> {
    let Some((source, token)) = find_token(headers) else {
        tracing::debug!("no session token presented");
        return Err(AppError::Unauthenticated);
    };

    match tokens.verify(&token) {
        Ok(claims) => Ok(claims),
        Err(TokenError::Expired) => {
            tracing::debug!(?source, "session token expired");
            Err(AppError::Unauthenticated)
        }
        Err(e) => {
            // Malformed or forged tokens are worth noticing.
            tracing::warn!(?source, error = %e, "session token rejected");
            Err(AppError::Unauthenticated)
        }
    }
}

/// AuthUser Extractor Result
///
/// The verified identity of the current request, taken from the token claims.
/// Lives only as long as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    /// RBAC role, `admin` or `editor`.
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Rejects non-admin identities with 403.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            return Ok(());
        }
        tracing::warn!(user_id = %self.id, role = %self.role, "admin route refused");
        Err(AppError::Forbidden)
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Makes `AuthUser` usable as a handler argument. Only the `TokenCodec` is
/// pulled from state; no store lookup happens here.
///
/// Rejection: `AppError::Unauthenticated` (401 `{"message":"Unauthorized"}`).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenCodec: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = TokenCodec::from_ref(state);
        authenticate(&parts.headers, &tokens).map(AuthUser::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn cookie_is_found_among_others() {
        let map = headers(&[(header::COOKIE, "theme=dark; cms_session=abc; lang=en")]);
        assert_eq!(
            find_token(&map),
            Some((TokenSource::Cookie, "abc".to_string()))
        );
    }

    #[test]
    fn bearer_used_when_no_cookie() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer xyz")]);
        assert_eq!(
            find_token(&map),
            Some((TokenSource::AuthorizationBearer, "xyz".to_string()))
        );
    }

    #[test]
    fn cookie_wins_over_bearer() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "cms_session=from-cookie"),
        ]);
        assert_eq!(find_token(&map).map(|(s, _)| s), Some(TokenSource::Cookie));
    }

    #[test]
    fn empty_values_are_not_candidates() {
        let map = headers(&[
            (header::COOKIE, "cms_session="),
            (header::AUTHORIZATION, "Basic dXNlcjpwYXNz"),
        ]);
        assert_eq!(find_token(&map), None);
    }

    #[test]
    fn require_admin_checks_role() {
        let mut user = AuthUser {
            id: Uuid::nil(),
            email: "e@x.com".into(),
            role: "editor".into(),
        };
        assert!(matches!(user.require_admin(), Err(AppError::Forbidden)));
        user.role = ROLE_ADMIN.into();
        assert!(user.require_admin().is_ok());
    }
}
