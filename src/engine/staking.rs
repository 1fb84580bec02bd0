//! Bounded-martingale staking state machine.
//!
//! Pure decision logic, no I/O: the session worker feeds round-open events
//! and reconciled outcomes in, and bet intents and resolutions come out.
//! The stake escalation is a fixed table of multiples of the per-user base
//! unit; winning through the whole table completes the mission and parks the
//! engine until the operator explicitly restarts it.

use serde::Serialize;
use tracing::debug;

use super::wheel::{RoundOutcome, Selection};

/// Number of rungs in the stake escalation table.
pub const MAX_LEVEL: usize = 4;

/// Stake per level, as a multiple of the base unit.
pub const STAKE_MULTIPLIERS: [f64; MAX_LEVEL] = [1.0, 4.0, 10.0, 22.0];

/// A bet the engine wants submitted for the round that just opened.
#[derive(Debug, Clone, PartialEq)]
pub struct BetIntent {
    pub round_id: String,
    pub selection: Selection,
    pub amount: f64,
    pub level: usize,
}

/// The settled result of a previously pending bet.
#[derive(Debug, Clone, Serialize)]
pub struct BetResolution {
    pub round_id: String,
    pub level: usize,
    pub selection: Selection,
    pub outcome: RoundOutcome,
    pub is_win: bool,
    pub amount: f64,
    pub profit_delta: f64,
    pub mission_completed: bool,
}

#[derive(Debug, Clone)]
struct PendingBet {
    round_id: String,
    selection: Selection,
    amount: f64,
    level: usize,
}

/// Per-user staking state.
///
/// Invariant: `pending` is set iff a bet has been submitted and no outcome
/// has been applied for it. `mission_completed`, once set, suppresses all
/// bets until [`StakingEngine::restart`].
#[derive(Debug)]
pub struct StakingEngine {
    base_stake: f64,
    /// Operator-requested base change, held until the engine is back at
    /// level 0 with nothing pending. Stakes never change mid-sequence.
    deferred_base: Option<f64>,
    selection: Selection,
    level: usize,
    pending: Option<PendingBet>,
    last_applied_round: Option<String>,
    mission_completed: bool,
    running: bool,
}

impl StakingEngine {
    pub fn new(base_stake: f64) -> Self {
        Self {
            base_stake: base_stake.max(0.01),
            deferred_base: None,
            selection: Selection::Awaiting,
            level: 0,
            pending: None,
            last_applied_round: None,
            mission_completed: false,
            running: false,
        }
    }

    /// Begin (or explicitly restart after mission completion) automatic
    /// betting. Resets the escalation to the base rung.
    pub fn restart(&mut self) {
        self.running = true;
        self.mission_completed = false;
        self.level = 0;
        self.try_apply_deferred_base();
    }

    /// Suppress all future bets. A bet already pending stays pending so its
    /// outcome can still be reconciled.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn arm_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    /// Request a base-stake change. Applied immediately when the engine sits
    /// at level 0 with nothing pending; otherwise deferred to the next time
    /// it does.
    pub fn request_base_stake(&mut self, amount: f64) {
        self.deferred_base = Some(amount.max(0.01));
        self.try_apply_deferred_base();
    }

    /// React to a round opening. Returns the bet to submit, if any, and arms
    /// it as pending; callers must report submission failure via
    /// [`StakingEngine::bet_not_placed`] so the pending flag stays truthful.
    pub fn on_round_opened(&mut self, round_id: &str) -> Option<BetIntent> {
        if !self.running
            || self.mission_completed
            || self.selection == Selection::Awaiting
            || self.pending.is_some()
        {
            return None;
        }

        let amount = self.base_stake * STAKE_MULTIPLIERS[self.level];
        let intent = BetIntent {
            round_id: round_id.to_string(),
            selection: self.selection,
            amount,
            level: self.level,
        };
        self.pending = Some(PendingBet {
            round_id: round_id.to_string(),
            selection: self.selection,
            amount,
            level: self.level,
        });
        Some(intent)
    }

    /// The submitted bet was rejected or never reached the server. Treated
    /// as not placed: pending clears, level is untouched.
    pub fn bet_not_placed(&mut self, round_id: &str) {
        if self
            .pending
            .as_ref()
            .map(|p| p.round_id == round_id)
            .unwrap_or(false)
        {
            self.pending = None;
        }
    }

    /// Apply a reconciled outcome to the pending bet. Idempotent: an outcome
    /// for a round that is not pending, or that was already applied, is a
    /// no-op returning `None`.
    pub fn apply_outcome(&mut self, outcome: &RoundOutcome) -> Option<BetResolution> {
        if self.last_applied_round.as_deref() == Some(outcome.round_id.as_str()) {
            return None;
        }
        let pending = match &self.pending {
            Some(p) if p.round_id == outcome.round_id => p.clone(),
            _ => return None,
        };

        let is_win = pending.selection.matches(outcome.number);
        let profit_delta = if is_win {
            pending.amount
        } else {
            -pending.amount
        };

        if is_win {
            self.level += 1;
            if self.level >= MAX_LEVEL {
                self.mission_completed = true;
                self.level = 0;
            }
        } else {
            self.level = 0;
        }
        self.pending = None;
        self.last_applied_round = Some(outcome.round_id.clone());
        if self.level == 0 {
            self.try_apply_deferred_base();
        }

        debug!(
            round_id = %outcome.round_id,
            number = outcome.number,
            is_win,
            level = self.level,
            mission_completed = self.mission_completed,
            "outcome applied"
        );

        Some(BetResolution {
            round_id: outcome.round_id.clone(),
            level: pending.level,
            selection: pending.selection,
            outcome: outcome.clone(),
            is_win,
            amount: pending.amount,
            profit_delta,
            mission_completed: self.mission_completed,
        })
    }

    fn try_apply_deferred_base(&mut self) {
        if self.level == 0 && self.pending.is_none() {
            if let Some(base) = self.deferred_base.take() {
                self.base_stake = base;
            }
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn base_stake(&self) -> f64 {
        self.base_stake
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mission_completed(&self) -> bool {
        self.mission_completed
    }

    pub fn pending_round_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.round_id.as_str())
    }

    pub fn next_stake(&self) -> f64 {
        self.base_stake * STAKE_MULTIPLIERS[self.level]
    }
}
