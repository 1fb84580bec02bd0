//! Session Supervisor
//!
//! Owns the table of per-user automation units with explicit lifecycle:
//! `connect` builds the whole stack for one user (registry entry, protocol
//! client + reconnection supervisor, proactive renewal timer, session
//! worker), `stop` tears the automation down while leaving the ledger
//! inspectable, and a later `connect` replaces everything wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::worker::{SessionShared, SessionWorker, WorkerCommand};
use crate::auth::{AuthError, SessionRegistry};
use crate::ledger::{HistoryEntry, OperationStats};
use crate::models::{Config, StatusSnapshot};
use crate::protocol::{run_connection_supervisor, ProtocolClient, ReconnectConfig};
use crate::reconcile::{OutcomeReconciler, RoundFeed};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for user")]
    NotFound,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("session is busy, retry shortly")]
    Busy,
}

/// Read-only operation report handed to the operator API.
#[derive(Debug, Serialize)]
pub struct ReportView {
    pub stats: OperationStats,
    pub history: Vec<HistoryEntry>,
}

struct UserSession {
    cmd_tx: mpsc::Sender<WorkerCommand>,
    shared: Arc<SessionShared>,
    worker_task: JoinHandle<()>,
    supervisor_task: JoinHandle<()>,
    renewal_task: JoinHandle<()>,
}

pub struct SessionManager {
    config: Config,
    registry: Arc<SessionRegistry>,
    feed: Arc<dyn RoundFeed>,
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl SessionManager {
    pub fn new(config: Config, registry: Arc<SessionRegistry>, feed: Arc<dyn RoundFeed>) -> Self {
        Self {
            config,
            registry,
            feed,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Authenticate the user and bring up its automation unit. An existing
    /// session for the same user is torn down and replaced.
    pub async fn connect(
        &self,
        user_id: &str,
        source_credential: &str,
        base_stake: f64,
    ) -> Result<(), SessionError> {
        self.teardown(user_id);
        self.registry.acquire(user_id, source_credential).await?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (client, handle, client_cmd_rx) = ProtocolClient::new(
            Duration::from_secs(self.config.heartbeat_secs),
            event_tx.clone(),
        );
        let reconciler = OutcomeReconciler::new(
            Arc::clone(&self.feed),
            Duration::from_millis(self.config.poll_interval_ms),
        );
        let (shared, cmd_tx, worker_task) = SessionWorker::spawn(
            user_id.to_string(),
            base_stake,
            handle,
            reconciler,
            event_rx,
        );

        let reconnect_config = ReconnectConfig {
            endpoint: self.config.game_endpoint.clone(),
            initial_backoff: Duration::from_millis(self.config.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.config.max_backoff_secs),
            max_attempts: self.config.max_reconnect_attempts,
            credential_stale_after: Duration::from_secs(self.config.renewal_interval_secs / 2),
        };
        let supervisor_task = {
            let registry = Arc::clone(&self.registry);
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                let end = run_connection_supervisor(
                    reconnect_config,
                    user_id.clone(),
                    registry,
                    client,
                    client_cmd_rx,
                    event_tx,
                )
                .await;
                info!(user_id = %user_id, ?end, "connection supervisor finished");
            })
        };
        let renewal_task = self.registry.spawn_renewal_timer(
            user_id.to_string(),
            Duration::from_secs(self.config.renewal_interval_secs),
        );

        self.sessions.write().insert(
            user_id.to_string(),
            UserSession {
                cmd_tx,
                shared,
                worker_task,
                supervisor_task,
                renewal_task,
            },
        );
        info!(user_id, base_stake, "session connected");
        Ok(())
    }

    /// Non-blocking command dispatch to the user's worker.
    pub fn command(&self, user_id: &str, cmd: WorkerCommand) -> Result<(), SessionError> {
        let sessions = self.sessions.read();
        let session = sessions.get(user_id).ok_or(SessionError::NotFound)?;
        session.cmd_tx.try_send(cmd).map_err(|_| SessionError::Busy)
    }

    /// Stop the automation: no reconnect, no new bets. The session record's
    /// credentials are destroyed; ledger and status stay inspectable until
    /// the next connect or an explicit reset.
    pub fn stop(&self, user_id: &str) -> Result<(), SessionError> {
        self.command(user_id, WorkerCommand::Stop)?;
        self.registry.remove(user_id);
        Ok(())
    }

    pub fn status(&self, user_id: &str) -> Result<StatusSnapshot, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions.get(user_id).ok_or(SessionError::NotFound)?;
        let snapshot = session.shared.snapshot.read().clone();
        Ok(snapshot)
    }

    pub fn report(&self, user_id: &str, history_limit: usize) -> Result<ReportView, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions.get(user_id).ok_or(SessionError::NotFound)?;
        let ledger = session.shared.ledger.read();
        Ok(ReportView {
            stats: ledger.stats().clone(),
            history: ledger.recent_history(history_limit),
        })
    }

    pub fn active_users(&self) -> usize {
        self.sessions.read().len()
    }

    fn teardown(&self, user_id: &str) {
        if let Some(session) = self.sessions.write().remove(user_id) {
            session.supervisor_task.abort();
            session.renewal_task.abort();
            session.worker_task.abort();
            self.registry.remove(user_id);
            info!(user_id, "previous session torn down");
        }
    }
}
