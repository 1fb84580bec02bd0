//! Staking Engine - Bounded Martingale Decision Core
//!
//! This module handles:
//! 1. Wheel layout and selection matching (pure functions of the number)
//! 2. The stake-escalation state machine reacting to round outcomes
//!
//! No I/O happens here; the session worker owns the wiring to the protocol
//! client and the outcome reconciler.

pub mod staking;
pub mod wheel;

pub use staking::{BetIntent, BetResolution, StakingEngine, MAX_LEVEL, STAKE_MULTIPLIERS};
pub use wheel::{derive_color, Color, RoundOutcome, Selection, HOUSE_NUMBER};
