//! Password recovery with short numeric codes.
//!
//! A code moves through `Requested -> Verified -> Consumed`; expiry, supersession
//! and an exhausted attempt budget all make it behave as absent. Only a peppered
//! SHA-256 of the code is ever stored, and every transition is a single
//! conditional update performed by the [`CredentialStore`].

use chrono::{Duration, Utc};
use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::{
    config::AppConfig,
    error::AppError,
    mailer::MailerState,
    models::{CodeCheck, CodeInput, ConfirmInput, EmailAddress, RecoveryCode},
    password,
    repository::CredentialState,
};

/// Generates a uniformly random 6-digit code, zero padded.
fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Hash stored in place of the code. The email is mixed in so equal codes for
/// different accounts never share a hash.
pub fn hash_code(pepper: &str, email: &EmailAddress, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update([0u8]);
    hasher.update(email.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// RecoveryCodeManager
///
/// Issues, verifies and redeems recovery codes. Responses never say whether an
/// account exists or why a code was refused.
#[derive(Clone)]
pub struct RecoveryCodeManager {
    credentials: CredentialState,
    mailer: MailerState,
    pepper: String,
    ttl: Duration,
    max_attempts: i32,
}

impl RecoveryCodeManager {
    pub fn new(
        credentials: CredentialState,
        mailer: MailerState,
        pepper: impl Into<String>,
        ttl_seconds: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            credentials,
            mailer,
            pepper: pepper.into(),
            ttl: Duration::seconds(ttl_seconds),
            max_attempts,
        }
    }

    pub fn from_config(
        credentials: CredentialState,
        mailer: MailerState,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            credentials,
            mailer,
            config.reset_code_pepper.clone(),
            config.reset_code_ttl_seconds,
            config.reset_code_max_attempts,
        )
    }

    /// request
    ///
    /// Replaces any earlier code for `email` with a fresh one and hands it to
    /// the mailer on a detached task. An unknown email is a silent no-op. Both
    /// branches return right after the store write, so delivery latency and
    /// delivery failures are invisible to the caller.
    pub async fn request(&self, email: &EmailAddress) -> Result<(), AppError> {
        let code = generate_code();
        let now = Utc::now();
        let record = RecoveryCode {
            email: email.as_str().to_string(),
            code_hash: hash_code(&self.pepper, email, &code),
            created_at: now,
            expires_at: now + self.ttl,
            verified_at: None,
            consumed_at: None,
            attempts_remaining: self.max_attempts,
        };

        if !self.credentials.replace_recovery_code(&record).await? {
            tracing::info!("recovery requested for unknown email");
            return Ok(());
        }

        let account = email.fingerprint();
        tracing::info!(%account, expires_at = %record.expires_at, "recovery code issued");

        let mailer = self.mailer.clone();
        let to = email.clone();
        let valid_for_seconds = self.ttl.num_seconds();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_recovery_code(&to, &code, valid_for_seconds).await {
                tracing::error!(%account, error = %e, "recovery code delivery failed");
            }
        });
        Ok(())
    }

    /// verify
    ///
    /// Confirms the code without consuming it. A wrong code burns one attempt.
    pub async fn verify(&self, input: &CodeInput) -> Result<(), AppError> {
        let code_hash = hash_code(&self.pepper, &input.email, &input.code);
        let check = self
            .credentials
            .verify_recovery_code(&input.email, &code_hash, Utc::now())
            .await?;
        self.settle(&input.email, check, "verify")
    }

    /// confirm
    ///
    /// Re-checks the code exactly like `verify`, then consumes it and replaces
    /// the password in one atomic store operation. Accepted from both the
    /// requested and the verified state.
    pub async fn confirm(&self, input: ConfirmInput) -> Result<(), AppError> {
        let ConfirmInput { code, new_password } = input;

        // Hashed up front so the store transaction holds no CPU-bound work.
        let new_hash = tokio::task::spawn_blocking(move || password::hash_password(&new_password))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let code_hash = hash_code(&self.pepper, &code.email, &code.code);
        let check = self
            .credentials
            .redeem_recovery_code(&code.email, &code_hash, &new_hash, Utc::now())
            .await?;
        self.settle(&code.email, check, "confirm")?;
        tracing::info!(account = %code.email.fingerprint(), "password reset completed");
        Ok(())
    }

    fn settle(&self, email: &EmailAddress, check: CodeCheck, step: &str) -> Result<(), AppError> {
        let account = email.fingerprint();
        match check {
            CodeCheck::Accepted => {
                tracing::debug!(%account, step, "recovery code accepted");
                Ok(())
            }
            CodeCheck::Mismatch { attempts_remaining } => {
                tracing::warn!(%account, step, attempts_remaining, "recovery code mismatch");
                Err(AppError::InvalidOrExpiredCode)
            }
            CodeCheck::NoActiveCode => {
                tracing::debug!(%account, step, "no active recovery code");
                Err(AppError::InvalidOrExpiredCode)
            }
        }
    }
}
