//! Session Registry
//!
//! Holds the current credential pair per user and owns the renewal
//! discipline: renewal always mints an entirely new pair and replaces the
//! record atomically, failures are counted toward a permanent cutoff, and
//! renewal is single-flight per user. Renewal can be triggered from three
//! places at once (the proactive timer, the reconnect path, a
//! session-invalid event); whichever caller arrives late awaits the in-flight
//! result instead of issuing a duplicate platform request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::provider::{AuthError, CredentialPair, CredentialProvider};

struct RenewalState {
    attempts: u32,
    last_renewal_at: DateTime<Utc>,
}

struct SessionEntry {
    source_credential: String,
    credentials: RwLock<CredentialPair>,
    /// Bumped on every successful replacement. A renew caller that observed
    /// an older generation before taking the renewal lock knows another
    /// flight already finished and reuses its result.
    generation: AtomicU64,
    renewal: Mutex<RenewalState>,
}

/// One record per active user, created on first successful authentication
/// and destroyed on stop or permanent renewal failure.
pub struct SessionRegistry {
    provider: Arc<dyn CredentialProvider>,
    max_renewal_attempts: u32,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn CredentialProvider>, max_renewal_attempts: u32) -> Self {
        Self {
            provider,
            max_renewal_attempts: max_renewal_attempts.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Authenticate a user for the first time and create its session record.
    /// Re-acquiring replaces any previous record wholesale.
    pub async fn acquire(
        &self,
        user_id: &str,
        source_credential: &str,
    ) -> Result<CredentialPair, AuthError> {
        let pair = self.provider.issue(source_credential).await?;
        let entry = Arc::new(SessionEntry {
            source_credential: source_credential.to_string(),
            credentials: RwLock::new(pair.clone()),
            generation: AtomicU64::new(0),
            renewal: Mutex::new(RenewalState {
                attempts: 0,
                last_renewal_at: Utc::now(),
            }),
        });
        self.sessions.write().insert(user_id.to_string(), entry);
        info!(user_id, "session acquired");
        Ok(pair)
    }

    pub fn get(&self, user_id: &str) -> Result<CredentialPair, AuthError> {
        let sessions = self.sessions.read();
        let entry = sessions.get(user_id).ok_or(AuthError::NotFound)?;
        let creds = entry.credentials.read().clone();
        Ok(creds)
    }

    /// Mint a fresh pair and replace the stored record. Single-flight:
    /// concurrent callers share one platform request.
    pub async fn renew(&self, user_id: &str) -> Result<CredentialPair, AuthError> {
        let entry = {
            let sessions = self.sessions.read();
            sessions.get(user_id).cloned().ok_or(AuthError::NotFound)?
        };

        let seen_generation = entry.generation.load(Ordering::Acquire);
        let mut state = entry.renewal.lock().await;

        // Another flight completed while this caller waited on the lock.
        if entry.generation.load(Ordering::Acquire) != seen_generation {
            return Ok(entry.credentials.read().clone());
        }

        match self.provider.issue(&entry.source_credential).await {
            Ok(pair) => {
                *entry.credentials.write() = pair.clone();
                entry.generation.fetch_add(1, Ordering::AcqRel);
                state.attempts = 0;
                state.last_renewal_at = Utc::now();
                info!(user_id, "credentials renewed");
                Ok(pair)
            }
            Err(e) if e.is_terminal() => {
                // Balance refusals and hard rejections are not retried and
                // do not consume the attempt budget.
                Err(e)
            }
            Err(e) => {
                state.attempts += 1;
                warn!(
                    user_id,
                    attempts = state.attempts,
                    error = %e,
                    "credential renewal failed"
                );
                if state.attempts >= self.max_renewal_attempts {
                    Err(AuthError::AttemptsExhausted {
                        attempts: state.attempts,
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Drop a user's session record.
    pub fn remove(&self, user_id: &str) {
        if self.sessions.write().remove(user_id).is_some() {
            info!(user_id, "session removed");
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.sessions.read().contains_key(user_id)
    }

    pub fn last_renewal_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        let entry = self.sessions.read().get(user_id).cloned()?;
        let state = entry.renewal.try_lock().ok()?;
        Some(state.last_renewal_at)
    }

    /// Credentials expire silently upstream, so renewal also runs on a fixed
    /// timer independent of failures. The task exits once the session record
    /// is gone; terminal failures are left for the reconnect path to surface.
    pub fn spawn_renewal_timer(
        self: &Arc<Self>,
        user_id: String,
        every: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it, the pair is fresh.
            tick.tick().await;
            loop {
                tick.tick().await;
                match registry.renew(&user_id).await {
                    Ok(_) => {}
                    Err(AuthError::NotFound) => break,
                    Err(e) if e.is_terminal() => {
                        warn!(user_id = %user_id, error = %e, "proactive renewal hit terminal failure");
                        break;
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "proactive renewal failed; will retry next tick");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct MockProvider {
        calls: AtomicU32,
        fail: RwLock<bool>,
        delay: Duration,
    }

    impl MockProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: RwLock::new(false),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialProvider for MockProvider {
        async fn issue(&self, source_credential: &str) -> Result<CredentialPair, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if *self.fail.read() {
                return Err(AuthError::Transport("connection reset".into()));
            }
            Ok(CredentialPair {
                session_token: format!("session-{n}"),
                auth_token: format!("auth-{n}"),
                external_user_id: source_credential.to_string(),
                issued_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_renewal_replaces_pair_wholesale() {
        let provider = MockProvider::new(Duration::ZERO);
        let registry = SessionRegistry::new(provider.clone(), 3);

        let first = registry.acquire("user-1", "cred").await.unwrap();
        let renewed = registry.renew("user-1").await.unwrap();
        assert_ne!(first.session_token, renewed.session_token);
        assert_ne!(first.auth_token, renewed.auth_token);
        assert_eq!(registry.get("user-1").unwrap().session_token, renewed.session_token);
    }

    #[tokio::test]
    async fn test_renewal_is_single_flight() {
        let provider = MockProvider::new(Duration::from_millis(50));
        let registry = Arc::new(SessionRegistry::new(provider.clone(), 3));
        registry.acquire("user-1", "cred").await.unwrap();
        let issued_before = provider.calls();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(
                async move { registry.renew("user-1").await },
            ));
        }
        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap().unwrap().session_token);
        }

        // Five concurrent triggers, exactly one outbound platform request.
        assert_eq!(provider.calls() - issued_before, 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_attempts_exhaust_into_permanent_failure() {
        let provider = MockProvider::new(Duration::ZERO);
        let registry = SessionRegistry::new(provider.clone(), 2);
        registry.acquire("user-1", "cred").await.unwrap();
        *provider.fail.write() = true;

        assert!(matches!(
            registry.renew("user-1").await,
            Err(AuthError::Transport(_))
        ));
        assert!(matches!(
            registry.renew("user-1").await,
            Err(AuthError::AttemptsExhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_successful_renewal_resets_attempt_counter() {
        let provider = MockProvider::new(Duration::ZERO);
        let registry = SessionRegistry::new(provider.clone(), 2);
        registry.acquire("user-1", "cred").await.unwrap();

        *provider.fail.write() = true;
        assert!(registry.renew("user-1").await.is_err());
        *provider.fail.write() = false;
        assert!(registry.renew("user-1").await.is_ok());

        // The earlier failure no longer counts toward the cutoff.
        *provider.fail.write() = true;
        assert!(matches!(
            registry.renew("user-1").await,
            Err(AuthError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_user_is_not_found() {
        let provider = MockProvider::new(Duration::ZERO);
        let registry = SessionRegistry::new(provider, 3);
        assert!(matches!(registry.get("ghost"), Err(AuthError::NotFound)));
    }
}
