//! Outcome Reconciler
//!
//! Polls the round feed for the outcome of the one pending bet. The poll
//! task exists only while a bet is pending: the session worker spawns it the
//! moment a bet is submitted and it exits the moment the pending round shows
//! up in the feed, having forwarded exactly one reconciled outcome. An idle
//! user polls nothing; the feed budget is shared across users.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use super::feed::{FeedRound, RoundFeed};
use crate::engine::RoundOutcome;

/// How many feed entries to scan per poll. Rounds run ~40s apart, so a
/// handful is enough to cover a slow poll cycle.
const FETCH_LIMIT: u32 = 20;

pub struct OutcomeReconciler {
    feed: Arc<dyn RoundFeed>,
    poll_interval: Duration,
}

impl OutcomeReconciler {
    pub fn new(feed: Arc<dyn RoundFeed>, poll_interval: Duration) -> Self {
        Self {
            feed,
            poll_interval,
        }
    }

    /// Spawn a poll loop for one pending round. Sends exactly one outcome on
    /// `outcome_tx`, then exits. Transient feed errors are logged and the
    /// next tick retries.
    pub fn spawn_poll(
        &self,
        user_id: String,
        round_id: String,
        outcome_tx: mpsc::Sender<RoundOutcome>,
    ) -> JoinHandle<()> {
        let feed = Arc::clone(&self.feed);
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut tick = interval(poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                if outcome_tx.is_closed() {
                    // Session worker is gone; nobody to deliver to.
                    return;
                }
                let rounds = match feed.recent_rounds(FETCH_LIMIT).await {
                    Ok(rounds) => rounds,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "round feed poll failed");
                        continue;
                    }
                };

                if let Some(entry) = rounds.iter().find(|r| r.round_id == round_id) {
                    let outcome = reconcile_entry(entry);
                    debug!(
                        user_id = %user_id,
                        round_id = %round_id,
                        number = outcome.number,
                        color = outcome.color.as_str(),
                        "pending round reconciled"
                    );
                    // Receiver gone means the session worker is shutting
                    // down; either way this task is done.
                    let _ = outcome_tx.send(outcome).await;
                    return;
                }
            }
        })
    }
}

/// Convert a feed entry into a settled outcome. The color is recomputed from
/// the number; a feed color that contradicts it is logged as a data
/// inconsistency and discarded.
pub fn reconcile_entry(entry: &FeedRound) -> RoundOutcome {
    let outcome = RoundOutcome::from_number(&entry.round_id, entry.number);
    if let Some(feed_color) = entry.color.as_deref() {
        if !feed_color.eq_ignore_ascii_case(outcome.color.as_str()) {
            warn!(
                round_id = %entry.round_id,
                number = entry.number,
                feed_color,
                derived_color = outcome.color.as_str(),
                "⚠️ data inconsistency: feed color contradicts wheel layout, using derived color"
            );
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Color;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedFeed {
        polls: AtomicU32,
        rounds: Mutex<Vec<FeedRound>>,
        /// Entries appear in the feed only from this poll number on.
        visible_after: u32,
    }

    impl ScriptedFeed {
        fn new(rounds: Vec<FeedRound>, visible_after: u32) -> Arc<Self> {
            Arc::new(Self {
                polls: AtomicU32::new(0),
                rounds: Mutex::new(rounds),
                visible_after,
            })
        }
    }

    #[async_trait]
    impl RoundFeed for ScriptedFeed {
        async fn recent_rounds(&self, _limit: u32) -> Result<Vec<FeedRound>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.visible_after {
                return Ok(Vec::new());
            }
            Ok(self.rounds.lock().clone())
        }
    }

    fn feed_round(round_id: &str, number: u8, color: Option<&str>) -> FeedRound {
        FeedRound {
            round_id: round_id.to_string(),
            number,
            color: color.map(|c| c.to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_reconcile_uses_derived_color_over_feed_color() {
        // Number 17 is red on the wheel; a feed claiming black loses.
        let entry = feed_round("rnd-1", 17, Some("black"));
        let outcome = reconcile_entry(&entry);
        assert_eq!(outcome.color, Color::Red);
    }

    #[test]
    fn test_reconcile_agreeing_feed_color() {
        let entry = feed_round("rnd-1", 20, Some("black"));
        let outcome = reconcile_entry(&entry);
        assert_eq!(outcome.color, Color::Black);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_sends_exactly_one_outcome_then_exits() {
        let feed = ScriptedFeed::new(vec![feed_round("rnd-7", 17, None)], 3);
        let reconciler =
            OutcomeReconciler::new(feed.clone(), Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(4);

        let handle = reconciler.spawn_poll("user-1".into(), "rnd-7".into(), tx);

        let outcome = rx.recv().await.expect("one outcome arrives");
        assert_eq!(outcome.round_id, "rnd-7");
        assert_eq!(outcome.number, 17);

        // The task is done; the channel closes without a second send.
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(feed.polls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ignores_other_rounds() {
        let feed = ScriptedFeed::new(
            vec![
                feed_round("rnd-other", 5, None),
                feed_round("rnd-9", 20, None),
            ],
            1,
        );
        let reconciler = OutcomeReconciler::new(feed, Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(4);

        reconciler.spawn_poll("user-1".into(), "rnd-9".into(), tx);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.round_id, "rnd-9");
        assert_eq!(outcome.number, 20);
    }
}
