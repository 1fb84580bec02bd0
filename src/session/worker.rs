//! Per-User Session Worker
//!
//! One task per user owns every mutation of that user's staking state and
//! ledger (single-writer discipline). Protocol events, reconciled outcomes
//! and operator commands all arrive over channels and are handled strictly
//! in sequence, which is what makes the pending-bet flag and the poll-loop
//! lifecycle atomic with each other.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{RoundOutcome, Selection, StakingEngine};
use crate::ledger::OperationLedger;
use crate::models::{OperationStatus, StatusSnapshot};
use crate::protocol::{ClientHandle, ProtocolEvent};
use crate::reconcile::OutcomeReconciler;

/// Operator commands, non-blocking: they mutate state and return; effects
/// are observed through status polling.
#[derive(Debug)]
pub enum WorkerCommand {
    Start,
    Stop,
    Select(Selection),
    UpdateStake(f64),
    ResetReport,
}

/// State shared read-only with the operator API. Only the worker writes.
pub struct SessionShared {
    pub snapshot: RwLock<StatusSnapshot>,
    pub ledger: RwLock<OperationLedger>,
}

impl SessionShared {
    fn new(base_stake: f64) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(StatusSnapshot {
                status: OperationStatus::Inactive,
                status_reason: None,
                connected: false,
                selection: Selection::Awaiting,
                level: 0,
                base_stake,
                next_stake: base_stake,
                mission_completed: false,
                pending_round_id: None,
                stats: Default::default(),
            }),
            ledger: RwLock::new(OperationLedger::new()),
        })
    }
}

pub struct SessionWorker {
    user_id: String,
    engine: StakingEngine,
    shared: Arc<SessionShared>,
    client: ClientHandle,
    reconciler: OutcomeReconciler,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    event_rx: mpsc::Receiver<ProtocolEvent>,
    outcome_tx: mpsc::Sender<RoundOutcome>,
    outcome_rx: mpsc::Receiver<RoundOutcome>,
    poll_task: Option<JoinHandle<()>>,
    connected: bool,
    status: OperationStatus,
    status_reason: Option<String>,
}

impl SessionWorker {
    /// Build the worker and spawn it. Returns the shared read view and the
    /// command sender the manager keeps.
    pub fn spawn(
        user_id: String,
        base_stake: f64,
        client: ClientHandle,
        reconciler: OutcomeReconciler,
        event_rx: mpsc::Receiver<ProtocolEvent>,
    ) -> (Arc<SessionShared>, mpsc::Sender<WorkerCommand>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        let shared = SessionShared::new(base_stake);

        let worker = Self {
            user_id,
            engine: StakingEngine::new(base_stake),
            shared: shared.clone(),
            client,
            reconciler,
            cmd_rx,
            event_rx,
            outcome_tx,
            outcome_rx,
            poll_task: None,
            connected: false,
            status: OperationStatus::Inactive,
            status_reason: None,
        };
        let task = tokio::spawn(worker.run());
        (shared, cmd_tx, task)
    }

    async fn run(mut self) {
        self.publish();
        // Cleared once the connection supervisor is gone; commands may still
        // arrive (status stays inspectable until removal).
        let mut events_open = true;
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd);
                }
                event = self.event_rx.recv(), if events_open => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => events_open = false,
                    }
                }
                outcome = self.outcome_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_outcome(outcome);
                    }
                }
            }
            self.publish();
        }

        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        debug!(user_id = %self.user_id, "session worker exited");
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Start => {
                self.engine.restart();
                self.status_reason = None;
                self.refresh_running_status();
                info!(user_id = %self.user_id, "▶️ automation started");
            }
            WorkerCommand::Stop => {
                self.engine.stop();
                self.client.close();
                self.status = OperationStatus::Inactive;
                self.status_reason = Some("stopped by operator".to_string());
                // A poll loop chasing an already-pending bet keeps running
                // so the outcome still lands in the ledger; no new bet or
                // poll starts afterward.
                info!(user_id = %self.user_id, "⏹️ automation stopped");
            }
            WorkerCommand::Select(selection) => {
                self.engine.arm_selection(selection);
                self.refresh_running_status();
                info!(user_id = %self.user_id, selection = selection.as_str(), "selection armed");
            }
            WorkerCommand::UpdateStake(amount) => {
                self.engine.request_base_stake(amount);
                debug!(user_id = %self.user_id, amount, "base stake update requested");
            }
            WorkerCommand::ResetReport => {
                self.shared.ledger.write().reset();
                info!(user_id = %self.user_id, "report reset");
            }
        }
    }

    fn handle_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Connected => {
                self.connected = true;
                self.refresh_running_status();
            }
            ProtocolEvent::RoundOpened { round_id } => {
                debug!(user_id = %self.user_id, round_id = %round_id, "round opened");
                self.maybe_bet(&round_id);
            }
            ProtocolEvent::RoundClosed { round_id } => {
                debug!(user_id = %self.user_id, round_id = %round_id, "round closed");
            }
            ProtocolEvent::BetAccepted { round_id } => {
                debug!(user_id = %self.user_id, round_id = %round_id, "bet accepted");
            }
            ProtocolEvent::BetRejected { round_id, reason } => {
                // Treated as not placed: level is untouched and the next
                // round re-arms at the same stake.
                warn!(user_id = %self.user_id, round_id = %round_id, ?reason, "bet rejected");
                self.engine.bet_not_placed(&round_id);
                self.stop_polling();
            }
            ProtocolEvent::SessionInvalid => {
                self.connected = false;
                if self.status != OperationStatus::Error {
                    self.status = OperationStatus::Analyzing;
                    self.status_reason = Some("session renewal in progress".to_string());
                }
            }
            ProtocolEvent::Disconnected { reason } => {
                self.connected = false;
                if self.status != OperationStatus::Error
                    && self.status != OperationStatus::Inactive
                {
                    self.status = OperationStatus::Analyzing;
                    self.status_reason = Some(format!("reconnecting: {reason}"));
                }
            }
            ProtocolEvent::Terminated { reason } => {
                self.connected = false;
                self.engine.stop();
                self.status = OperationStatus::Error;
                self.status_reason = Some(reason);
            }
        }
    }

    /// Ask the engine for a bet and submit it. Arming the pending flag and
    /// starting the poll loop happen here, in one handler, which keeps them
    /// atomic under the single-writer discipline.
    fn maybe_bet(&mut self, round_id: &str) {
        let Some(intent) = self.engine.on_round_opened(round_id) else {
            return;
        };

        match self
            .client
            .submit_bet(&intent.round_id, intent.selection, intent.amount)
        {
            Ok(()) => {
                info!(
                    user_id = %self.user_id,
                    round_id = %intent.round_id,
                    selection = intent.selection.as_str(),
                    amount = intent.amount,
                    level = intent.level,
                    "🎰 bet submitted"
                );
                let handle = self.reconciler.spawn_poll(
                    self.user_id.clone(),
                    intent.round_id.clone(),
                    self.outcome_tx.clone(),
                );
                self.poll_task = Some(handle);
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "bet not placed");
                self.engine.bet_not_placed(&intent.round_id);
            }
        }
    }

    fn handle_outcome(&mut self, outcome: RoundOutcome) {
        let Some(resolution) = self.engine.apply_outcome(&outcome) else {
            // Already applied or not the pending round; exactly-once holds.
            return;
        };
        self.stop_polling();

        info!(
            user_id = %self.user_id,
            round_id = %resolution.round_id,
            number = resolution.outcome.number,
            color = resolution.outcome.color.as_str(),
            is_win = resolution.is_win,
            profit_delta = resolution.profit_delta,
            "outcome applied"
        );
        self.shared.ledger.write().record_result(&resolution);

        if resolution.mission_completed {
            info!(user_id = %self.user_id, "🎯 mission completed; awaiting explicit restart");
            self.status = OperationStatus::Analyzing;
            self.status_reason = Some("mission completed".to_string());
        }
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn refresh_running_status(&mut self) {
        if self.status == OperationStatus::Error {
            return;
        }
        self.status = if !self.connected {
            if self.engine.is_running() {
                OperationStatus::Analyzing
            } else {
                OperationStatus::Inactive
            }
        } else if self.engine.is_running()
            && self.engine.selection() != Selection::Awaiting
            && !self.engine.mission_completed()
        {
            OperationStatus::Operating
        } else {
            OperationStatus::Analyzing
        };
    }

    /// Push the current state into the shared snapshot for API readers.
    fn publish(&self) {
        let stats = self.shared.ledger.read().stats().clone();
        *self.shared.snapshot.write() = StatusSnapshot {
            status: self.status,
            status_reason: self.status_reason.clone(),
            connected: self.connected,
            selection: self.engine.selection(),
            level: self.engine.level(),
            base_stake: self.engine.base_stake(),
            next_stake: self.engine.next_stake(),
            mission_completed: self.engine.mission_completed(),
            pending_round_id: self.engine.pending_round_id().map(|s| s.to_string()),
            stats,
        };
    }
}
