//! Reconcile Module - Pending Bet Settlement
//!
//! This module handles:
//! 1. The round feed REST boundary
//! 2. The pending-bet poll loop that turns feed entries into settled
//!    outcomes, exactly once per round

pub mod feed;
pub mod poller;

pub use feed::{FeedRound, HttpRoundFeed, RoundFeed};
pub use poller::{reconcile_entry, OutcomeReconciler};
