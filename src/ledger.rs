//! Operation Ledger
//!
//! Per-user counters plus an append-only detailed history of settled bets.
//! Written only by the session worker, exposed read-only to the operator
//! API. The history is a bounded ring so a multi-hour session cannot grow
//! memory without limit; durable persistence belongs to the external record
//! store, not here.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::{BetResolution, Color, Selection};

/// Maximum retained history entries per user.
const HISTORY_CAP: usize = 1000;

/// Running totals for one user's operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub total_bets: u64,
    pub wins: u64,
    pub losses: u64,
    pub profit: f64,
    pub started_at: DateTime<Utc>,
}

impl Default for OperationStats {
    fn default() -> Self {
        Self {
            total_bets: 0,
            wins: 0,
            losses: 0,
            profit: 0.0,
            started_at: Utc::now(),
        }
    }
}

/// Immutable record of one settled bet.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub round_id: String,
    pub level: usize,
    pub selection: Selection,
    pub outcome_number: u8,
    pub outcome_color: Color,
    pub is_win: bool,
    pub bet_amount: f64,
    pub profit: f64,
}

/// Append-only writer, read-only exposure.
#[derive(Debug, Default)]
pub struct OperationLedger {
    stats: OperationStats,
    history: VecDeque<HistoryEntry>,
}

impl OperationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one settled bet. Updates the counters and appends a history
    /// entry, evicting the oldest once the ring is full.
    pub fn record_result(&mut self, resolution: &BetResolution) {
        self.stats.total_bets += 1;
        if resolution.is_win {
            self.stats.wins += 1;
        } else {
            self.stats.losses += 1;
        }
        self.stats.profit += resolution.profit_delta;

        if self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            round_id: resolution.round_id.clone(),
            level: resolution.level,
            selection: resolution.selection,
            outcome_number: resolution.outcome.number,
            outcome_color: resolution.outcome.color,
            is_win: resolution.is_win,
            bet_amount: resolution.amount,
            profit: resolution.profit_delta,
        });
    }

    /// Zero the counters and clear history. Only the explicit operator
    /// command calls this; mission completion never does.
    pub fn reset(&mut self) {
        self.stats = OperationStats::default();
        self.history.clear();
    }

    pub fn stats(&self) -> &OperationStats {
        &self.stats
    }

    /// Most recent entries first.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RoundOutcome;

    fn resolution(round_id: &str, is_win: bool, amount: f64) -> BetResolution {
        BetResolution {
            round_id: round_id.to_string(),
            level: 0,
            selection: Selection::Red,
            outcome: RoundOutcome::from_number(round_id, if is_win { 17 } else { 20 }),
            is_win,
            amount,
            profit_delta: if is_win { amount } else { -amount },
            mission_completed: false,
        }
    }

    #[test]
    fn test_counters_track_wins_and_losses() {
        let mut ledger = OperationLedger::new();
        ledger.record_result(&resolution("r-0", true, 1.0));
        ledger.record_result(&resolution("r-1", false, 4.0));

        let stats = ledger.stats();
        assert_eq!(stats.total_bets, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.profit, -3.0);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mut ledger = OperationLedger::new();
        for i in 0..(HISTORY_CAP + 25) {
            ledger.record_result(&resolution(&format!("r-{i}"), true, 1.0));
        }
        assert_eq!(ledger.history_len(), HISTORY_CAP);
        // The oldest entries were evicted; the newest survive.
        let newest = ledger.recent_history(1);
        assert_eq!(newest[0].round_id, format!("r-{}", HISTORY_CAP + 24));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = OperationLedger::new();
        ledger.record_result(&resolution("r-0", true, 1.0));
        ledger.reset();
        assert_eq!(ledger.stats().total_bets, 0);
        assert_eq!(ledger.stats().profit, 0.0);
        assert_eq!(ledger.history_len(), 0);
    }
}
