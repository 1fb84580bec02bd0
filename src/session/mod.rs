//! Session Module - Per-User Automation Units
//!
//! This module handles:
//! 1. The single-writer worker task owning one user's staking state
//! 2. The supervisor table that creates and destroys those units

pub mod manager;
pub mod worker;

pub use manager::{ReportView, SessionError, SessionManager};
pub use worker::{SessionShared, SessionWorker, WorkerCommand};
