use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{error::AppError, password};

// --- Identity ---

/// User
///
/// A CMS account as stored in the `users` table, without its password hash.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    /// Always stored lowercased.
    pub email: String,
    pub name: String,
    /// RBAC field: `admin` or `editor`.
    pub role: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";

/// Credential
///
/// A user row together with its argon2id PHC hash. Only the credential store and
/// the session issuer ever see this type.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    #[sqlx(flatten)]
    pub user: User,
    pub password_hash: String,
}

/// UserProfile
///
/// Public projection of a user returned by `/auth/login` and `/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

/// EmailAddress
///
/// A trimmed, lowercased address that passed the boundary check. Lookups and
/// recovery-code records are always keyed by this form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_lowercase();
        let valid = normalized.len() <= 254
            && normalized
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid {
            return Err(AppError::validation("email must be a valid address"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short digest of the address, used in logs in place of the address.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0.as_bytes())[..6])
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Recovery codes ---

/// RecoveryCode
///
/// The single recovery-code record kept per email. Only the peppered hash of the
/// numeric code is stored.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct RecoveryCode {
    pub email: String,
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub attempts_remaining: i32,
}

impl RecoveryCode {
    /// Unconsumed, unexpired and with attempts left.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.expires_at > now && self.attempts_remaining > 0
    }
}

/// Outcome of a conditional update against a recovery-code record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// Active record with a matching hash; the transition was applied.
    Accepted,
    /// Active record, wrong code; one attempt was burned.
    Mismatch { attempts_remaining: i32 },
    /// Absent, expired, consumed or exhausted.
    NoActiveCode,
}

// --- Auth request payloads (raw shapes, validated at the boundary) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Validated login input.
#[derive(Debug)]
pub struct LoginInput {
    pub email: EmailAddress,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<LoginInput, AppError> {
        if self.password.is_empty() {
            return Err(AppError::validation("password is required"));
        }
        Ok(LoginInput {
            email: EmailAddress::parse(&self.email)?,
            password: self.password,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetRequest {
    pub email: String,
}

impl ResetRequest {
    pub fn validate(self) -> Result<EmailAddress, AppError> {
        EmailAddress::parse(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetVerifyRequest {
    pub email: String,
    pub code: String,
}

/// Validated `(email, code)` pair.
#[derive(Debug)]
pub struct CodeInput {
    pub email: EmailAddress,
    pub code: String,
}

pub const RECOVERY_CODE_DIGITS: usize = 6;

fn parse_code(raw: &str) -> Result<String, AppError> {
    let code = raw.trim();
    if code.len() != RECOVERY_CODE_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::validation(format!(
            "code must be {RECOVERY_CODE_DIGITS} digits"
        )));
    }
    Ok(code.to_string())
}

impl ResetVerifyRequest {
    pub fn validate(self) -> Result<CodeInput, AppError> {
        Ok(CodeInput {
            email: EmailAddress::parse(&self.email)?,
            code: parse_code(&self.code)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ResetConfirmRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// Validated confirm input. The new password already satisfies the policy.
#[derive(Debug)]
pub struct ConfirmInput {
    pub code: CodeInput,
    pub new_password: String,
}

impl ResetConfirmRequest {
    pub fn validate(self) -> Result<ConfirmInput, AppError> {
        let code = CodeInput {
            email: EmailAddress::parse(&self.email)?,
            code: parse_code(&self.code)?,
        };
        password::validate_password(&self.new_password)
            .map_err(|e| AppError::validation(e.to_string()))?;
        Ok(ConfirmInput {
            code,
            new_password: self.new_password,
        })
    }
}

// --- Content resources ---

/// Show
///
/// A scheduled event listed on the portfolio site.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Show {
    pub id: Uuid,
    pub title: String,
    pub venue: String,
    #[ts(type = "string")]
    pub starts_at: DateTime<Utc>,
    pub description: Option<String>,
    pub is_featured: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateShowRequest {
    pub title: String,
    pub venue: String,
    #[ts(type = "string")]
    pub starts_at: DateTime<Utc>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
}

impl CreateShowRequest {
    pub fn validate(self) -> Result<Self, AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        if self.venue.trim().is_empty() {
            return Err(AppError::validation("venue is required"));
        }
        if self.title.len() > 200 {
            return Err(AppError::validation("title must be <= 200 chars"));
        }
        Ok(self)
    }
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateShowRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_featured: Option<bool>,
}

impl UpdateShowRequest {
    pub fn validate(self) -> Result<Self, AppError> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::validation("title cannot be empty"));
        }
        if self.venue.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(AppError::validation("venue cannot be empty"));
        }
        Ok(self)
    }
}

/// Brand
///
/// A partner brand shown on the portfolio pages. Changes rarely.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Brand {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateBrandRequest {
    pub name: String,
    pub website: Option<String>,
}

impl CreateBrandRequest {
    pub fn validate(self) -> Result<Self, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name is required"));
        }
        if let Some(url) = &self.website
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            return Err(AppError::validation("website must be an http(s) URL"));
        }
        Ok(self)
    }
}
