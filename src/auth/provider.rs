//! Casino Platform Credential Provider
//!
//! Opaque HTTP adapter that mints a fresh session token pair for one user.
//! The platform treats token pairs as short-lived and single-use per
//! connection, so callers never refresh in place; they ask for a whole new
//! pair and replace the old one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A complete token pair as issued by the platform. Replaced wholesale on
/// renewal, never mutated field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPair {
    pub session_token: String,
    pub auth_token: String,
    pub external_user_id: String,
    pub issued_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.issued_at
    }
}

/// Authentication failure taxonomy.
///
/// `BalanceInsufficient` is a business condition, not an auth failure: it
/// must not invalidate credentials or trigger retries.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("insufficient balance: {0}")]
    BalanceInsufficient(String),
    #[error("credential request rejected: {0}")]
    Rejected(String),
    #[error("credential provider timed out")]
    Timeout,
    #[error("credential provider transport error: {0}")]
    Transport(String),
    #[error("renewal attempts exhausted after {attempts} failures")]
    AttemptsExhausted { attempts: u32 },
    #[error("no active session for user")]
    NotFound,
}

impl AuthError {
    /// Terminal errors end the user's operation instead of retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::BalanceInsufficient(_)
                | AuthError::Rejected(_)
                | AuthError::AttemptsExhausted { .. }
        )
    }
}

/// Seam for the platform call so the registry can run against a scripted
/// provider in tests.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn issue(&self, source_credential: &str) -> Result<CredentialPair, AuthError>;
}

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    user_credential: &'a str,
    browser_fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    session_token: String,
    auth_token: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct IssueErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Live HTTP implementation against the casino platform.
pub struct PlatformCredentialProvider {
    client: Client,
    issue_url: String,
}

impl PlatformCredentialProvider {
    pub fn new(issue_url: String, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self { client, issue_url })
    }

    /// Random per-request fingerprint. The platform fingerprints the
    /// requesting browser; a stable value across renewals trips its
    /// duplicate-session detection.
    fn browser_fingerprint() -> String {
        let mut rng = rand::thread_rng();
        (0..16)
            .map(|_| format!("{:02x}", rng.gen::<u8>()))
            .collect()
    }
}

#[async_trait]
impl CredentialProvider for PlatformCredentialProvider {
    async fn issue(&self, source_credential: &str) -> Result<CredentialPair, AuthError> {
        let body = IssueRequest {
            user_credential: source_credential,
            browser_fingerprint: Self::browser_fingerprint(),
        };

        let resp = self
            .client
            .post(&self.issue_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout
                } else {
                    AuthError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            let issued: IssueResponse = resp
                .json()
                .await
                .map_err(|e| AuthError::Transport(format!("bad issue response: {e}")))?;
            debug!(user_id = %issued.user_id, "token pair issued");
            return Ok(CredentialPair {
                session_token: issued.session_token,
                auth_token: issued.auth_token,
                external_user_id: issued.user_id,
                issued_at: Utc::now(),
            });
        }

        let error_body: IssueErrorBody = resp.json().await.unwrap_or(IssueErrorBody {
            code: String::new(),
            message: String::new(),
        });

        if status == StatusCode::PAYMENT_REQUIRED || error_body.code == "INSUFFICIENT_BALANCE" {
            return Err(AuthError::BalanceInsufficient(if error_body.message.is_empty() {
                "account balance too low to open a game session".to_string()
            } else {
                error_body.message
            }));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected(format!(
                "{} {}",
                status, error_body.message
            )));
        }
        Err(AuthError::Transport(format!(
            "{} {}",
            status, error_body.message
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprints_are_unique_hex() {
        let a = PlatformCredentialProvider::browser_fingerprint();
        let b = PlatformCredentialProvider::browser_fingerprint();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(AuthError::BalanceInsufficient("low".into()).is_terminal());
        assert!(AuthError::Rejected("401".into()).is_terminal());
        assert!(AuthError::AttemptsExhausted { attempts: 3 }.is_terminal());
        assert!(!AuthError::Timeout.is_terminal());
        assert!(!AuthError::Transport("reset".into()).is_terminal());
    }

    #[test]
    fn test_issue_error_body_tolerates_missing_fields() {
        let body: IssueErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.code.is_empty());
        assert!(body.message.is_empty());
    }
}
