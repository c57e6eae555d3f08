use async_trait::async_trait;
use serde::Serialize;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

use crate::models::EmailAddress;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail provider rejected message with status {0}")]
    Rejected(u16),
}

/// Mailer
///
/// Delivers recovery codes to the address that requested them. The recovery
/// flow never reports delivery failures to the caller.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_recovery_code(
        &self,
        to: &EmailAddress,
        code: &str,
        valid_for_seconds: i64,
    ) -> Result<(), MailerError>;
}

pub type MailerState = Arc<dyn Mailer>;

#[derive(Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    subject: &'a str,
    text: String,
}

fn recovery_text(code: &str, valid_for_seconds: i64) -> String {
    format!(
        "Your Stagehouse password reset code is {code}. It expires in {} minutes. \
         If you did not ask for a reset you can ignore this message.",
        (valid_for_seconds / 60).max(1)
    )
}

/// HttpMailer
///
/// Posts a JSON message to a transactional-mail HTTP endpoint.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_recovery_code(
        &self,
        to: &EmailAddress,
        code: &str,
        valid_for_seconds: i64,
    ) -> Result<(), MailerError> {
        let message = OutboundMessage {
            to: to.as_str(),
            subject: "Your password reset code",
            text: recovery_text(code, valid_for_seconds),
        };

        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MailerError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// LogMailer
///
/// Local-development stand-in: records that a code went out, and the code
/// itself only at debug level.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_recovery_code(
        &self,
        to: &EmailAddress,
        code: &str,
        valid_for_seconds: i64,
    ) -> Result<(), MailerError> {
        tracing::info!(account = %to.fingerprint(), valid_for_seconds, "recovery code issued (log mailer)");
        tracing::debug!(%to, code, "recovery code");
        Ok(())
    }
}

/// A message captured by [`MockMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub to: String,
    pub code: String,
}

/// MockMailer
///
/// Records every message instead of sending it, so tests can read the code a
/// user would have received.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentCode>>,
    /// When true, every send fails.
    pub should_fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            sent: Mutex::default(),
            should_fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentCode> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Waits until at least `count` messages were recorded, or two seconds
    /// passed, and returns what was recorded. Delivery runs on a detached task.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<SentCode> {
        let poll = async {
            loop {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), poll)
            .await
            .unwrap_or_else(|_| self.sent())
    }

    /// Most recent code sent to `email`.
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == email)
            .map(|m| m.code)
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_recovery_code(
        &self,
        to: &EmailAddress,
        code: &str,
        _valid_for_seconds: i64,
    ) -> Result<(), MailerError> {
        if self.should_fail {
            return Err(MailerError::Transport("mock mailer set to fail".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentCode {
                to: to.as_str().to_string(),
                code: code.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_text_rounds_to_minutes() {
        let text = recovery_text("123456", 300);
        assert!(text.contains("123456"));
        assert!(text.contains("5 minutes"));
        assert!(recovery_text("000000", 20).contains("1 minutes"));
    }

    #[tokio::test]
    async fn mock_mailer_remembers_latest_code() {
        let mailer = MockMailer::new();
        let to = EmailAddress::parse("a@x.com").unwrap();
        mailer.send_recovery_code(&to, "111111", 300).await.unwrap();
        mailer.send_recovery_code(&to, "222222", 300).await.unwrap();
        assert_eq!(mailer.last_code_for("a@x.com").as_deref(), Some("222222"));
        assert_eq!(mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn wait_for_sent_sees_detached_delivery() {
        let mailer = Arc::new(MockMailer::new());
        let to = EmailAddress::parse("a@x.com").unwrap();
        let sender = mailer.clone();
        tokio::spawn(async move {
            sender.send_recovery_code(&to, "333333", 300).await.unwrap();
        });
        let sent = mailer.wait_for_sent(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code, "333333");
    }
}
