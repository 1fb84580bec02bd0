//! Round Feed REST Client
//!
//! The external round feed lists recently finished rounds, most recent
//! first. It is only consulted while a bet is pending; its reported color is
//! advisory (see `poller`), the settled color is always recomputed from the
//! number.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// One feed entry as reported upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRound {
    pub round_id: String,
    pub number: u8,
    /// Feed-supplied color. Not trusted; compared against the derived color
    /// for conflict logging only.
    #[serde(default)]
    pub color: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RoundsResponse {
    rounds: Vec<FeedRound>,
}

/// Seam so the reconciler can be driven by a scripted feed in tests.
#[async_trait]
pub trait RoundFeed: Send + Sync + 'static {
    /// Most recent rounds first.
    async fn recent_rounds(&self, limit: u32) -> Result<Vec<FeedRound>>;
}

pub struct HttpRoundFeed {
    client: Client,
    recent_url: String,
}

impl HttpRoundFeed {
    pub fn new(recent_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("failed to build round feed client")?;
        Ok(Self { client, recent_url })
    }
}

#[async_trait]
impl RoundFeed for HttpRoundFeed {
    async fn recent_rounds(&self, limit: u32) -> Result<Vec<FeedRound>> {
        let resp = self
            .client
            .get(&self.recent_url)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .context("GET recent rounds failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET recent rounds {}: {}", status, text);
        }

        let body: RoundsResponse = resp
            .json()
            .await
            .context("failed to parse rounds response")?;
        Ok(body.rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_round_deserialization() {
        let json = r#"{
            "round_id": "rnd-100",
            "number": 17,
            "color": "black",
            "timestamp": "2026-08-06T12:00:00Z"
        }"#;
        let round: FeedRound = serde_json::from_str(json).unwrap();
        assert_eq!(round.round_id, "rnd-100");
        assert_eq!(round.number, 17);
        assert_eq!(round.color.as_deref(), Some("black"));
    }

    #[test]
    fn test_feed_round_color_is_optional() {
        let json = r#"{
            "round_id": "rnd-101",
            "number": 0,
            "timestamp": "2026-08-06T12:00:30Z"
        }"#;
        let round: FeedRound = serde_json::from_str(json).unwrap();
        assert!(round.color.is_none());
    }
}
