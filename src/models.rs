use serde::{Deserialize, Serialize};

use crate::engine::Selection;
use crate::ledger::OperationStats;

/// Operator-visible operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Not connected or stopped.
    Inactive,
    /// Connected and watching rounds, not currently arming bets.
    Analyzing,
    /// Connected with an armed selection, betting automatically.
    Operating,
    /// Terminal failure; automatic betting stopped until the operator
    /// intervenes.
    Error,
}

/// Point-in-time view of one user's automation, published by the session
/// worker after every state change and read by the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: OperationStatus,
    /// Human-readable reason, set for `Error` and informational states.
    pub status_reason: Option<String>,
    pub connected: bool,
    pub selection: Selection,
    pub level: usize,
    pub base_stake: f64,
    pub next_stake: f64,
    pub mission_completed: bool,
    pub pending_round_id: Option<String>,
    pub stats: OperationStats,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub auth_issue_url: String,
    pub game_endpoint: String,
    pub round_feed_url: String,
    pub heartbeat_secs: u64,
    pub renewal_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub max_reconnect_attempts: u32,
    pub max_renewal_attempts: u32,
    pub auth_timeout_secs: u64,
    pub feed_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let auth_issue_url = std::env::var("AUTH_ISSUE_URL")
            .unwrap_or_else(|_| "https://platform.example.com/api/auth/session".to_string());

        let game_endpoint = std::env::var("GAME_WS_ENDPOINT")
            .unwrap_or_else(|_| "wss://game.example.com/ws".to_string());

        let round_feed_url = std::env::var("ROUND_FEED_URL")
            .unwrap_or_else(|_| "https://feed.example.com/api/rounds/recent".to_string());

        let heartbeat_secs = env_u64("HEARTBEAT_SECS", 30);
        let renewal_interval_secs = env_u64("RENEWAL_INTERVAL_SECS", 600);
        let poll_interval_ms = env_u64("ROUND_POLL_INTERVAL_MS", 2000);
        let initial_backoff_ms = env_u64("RECONNECT_INITIAL_BACKOFF_MS", 1000);
        let max_backoff_secs = env_u64("RECONNECT_MAX_BACKOFF_SECS", 30);
        let max_reconnect_attempts = env_u64("MAX_RECONNECT_ATTEMPTS", 10) as u32;
        let max_renewal_attempts = env_u64("MAX_RENEWAL_ATTEMPTS", 3) as u32;
        let auth_timeout_secs = env_u64("AUTH_TIMEOUT_SECS", 10);
        let feed_timeout_secs = env_u64("FEED_TIMEOUT_SECS", 10);

        Ok(Self {
            port,
            auth_issue_url,
            game_endpoint,
            round_feed_url,
            heartbeat_secs,
            renewal_interval_secs,
            poll_interval_ms,
            initial_backoff_ms,
            max_backoff_secs,
            max_reconnect_attempts,
            max_renewal_attempts,
            auth_timeout_secs,
            feed_timeout_secs,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&OperationStatus::Operating).unwrap(),
            "\"OPERATING\""
        );
        assert_eq!(
            serde_json::to_string(&OperationStatus::Inactive).unwrap(),
            "\"INACTIVE\""
        );
    }
}
