//! Reconnection Controller
//!
//! Wraps the protocol client lifecycle: exponential backoff with a ceiling,
//! an attempt cap that turns into a terminal failure, fresh credentials
//! before every reconnect attempt (token pairs are short-lived and
//! single-use per connection), and the redirect/session-invalid special
//! cases. A normal user-initiated close never reconnects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::client::{ClientCommand, ConnectionExit, ProtocolClient, ProtocolEvent};
use crate::auth::{AuthError, CredentialPair, SessionRegistry};

/// Doubling backoff with a ceiling. Delays are monotonically non-decreasing
/// until `reset`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait before the next attempt; doubles for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub endpoint: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    /// A pair older than this is renewed before following a redirect.
    pub credential_stale_after: Duration,
}

/// How the supervisor ended, reported to the session worker.
#[derive(Debug)]
pub enum SupervisorEnd {
    /// User stop or session teardown; nothing to surface.
    Stopped,
    /// Attempts exhausted or permanent auth failure; the operation is done.
    Terminal { reason: String },
}

/// Drive one user's connection until stop or terminal failure.
pub async fn run_connection_supervisor(
    config: ReconnectConfig,
    user_id: String,
    registry: Arc<SessionRegistry>,
    client: ProtocolClient,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) -> SupervisorEnd {
    let mut backoff = BackoffPolicy::new(config.initial_backoff, config.max_backoff);
    let mut attempts: u32 = 0;
    let mut endpoint = config.endpoint.clone();
    // The pair acquired at connect time is fresh; renewals start once a
    // connection has to be rebuilt.
    let mut credentials: Option<CredentialPair> = registry.get(&user_id).ok();

    let end = loop {
        let creds = match credentials.take() {
            Some(c) => c,
            None => match registry.renew(&user_id).await {
                Ok(c) => c,
                Err(AuthError::NotFound) => break SupervisorEnd::Stopped,
                Err(e) if e.is_terminal() => {
                    break SupervisorEnd::Terminal {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= config.max_attempts {
                        break SupervisorEnd::Terminal {
                            reason: format!("credential renewal kept failing: {e}"),
                        };
                    }
                    let delay = backoff.next_delay();
                    warn!(user_id = %user_id, error = %e, ?delay, "renewal failed; backing off");
                    sleep(delay).await;
                    continue;
                }
            },
        };

        match client.connect_and_stream(&endpoint, &creds, &mut cmd_rx).await {
            Ok(exit) => {
                // The handshake succeeded, so the failure streak is over.
                attempts = 0;
                backoff.reset();

                match exit {
                    ConnectionExit::NormalClose => break SupervisorEnd::Stopped,
                    ConnectionExit::Redirect { endpoint: next } => {
                        info!(user_id = %user_id, endpoint = %next, "following server redirect");
                        endpoint = next;
                        // Reuse the pair if it is still fresh enough to
                        // survive the re-handshake; renew otherwise.
                        match registry.get(&user_id) {
                            Ok(pair)
                                if pair.age().to_std().unwrap_or(Duration::MAX)
                                    < config.credential_stale_after =>
                            {
                                credentials = Some(pair);
                            }
                            _ => {}
                        }
                    }
                    ConnectionExit::SessionInvalid => {
                        // Mid-session token expiry: renew immediately, no
                        // backoff. The renew at the top of the loop does it.
                        attempts = 1;
                    }
                    ConnectionExit::Abnormal { reason } => {
                        attempts = 1;
                        let delay = backoff.next_delay();
                        warn!(user_id = %user_id, reason, ?delay, "abnormal disconnect; backing off");
                        sleep(delay).await;
                    }
                }
            }
            Err(e) => {
                attempts += 1;
                if attempts >= config.max_attempts {
                    break SupervisorEnd::Terminal {
                        reason: format!("gave up after {attempts} connection attempts: {e}"),
                    };
                }
                let delay = backoff.next_delay();
                warn!(
                    user_id = %user_id,
                    error = %e,
                    attempts,
                    ?delay,
                    "connection attempt failed; backing off"
                );
                sleep(delay).await;
            }
        }
    };

    if let SupervisorEnd::Terminal { reason } = &end {
        error!(user_id = %user_id, reason, "🛑 connection supervisor giving up");
        let _ = event_tx
            .send(ProtocolEvent::Terminated {
                reason: reason.clone(),
            })
            .await;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_monotonic_until_reset() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));

        let mut last = Duration::ZERO;
        for _ in 0..8 {
            let delay = backoff.next_delay();
            assert!(delay >= last, "backoff must never shrink mid-streak");
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}
