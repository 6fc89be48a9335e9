use crate::{
    error::AuthenticationError,
    flow::{AuthEvent, AuthFlow, AuthPhase, FlowError},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tokens this close to expiry may be refreshed.
pub const REFRESH_MARGIN_SECS: i64 = 300;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
struct SessionEntry {
    flow: AuthFlow,
    pending_state: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    last_accessed: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            flow: AuthFlow::new(),
            pending_state: None,
            token_expires_at: None,
            last_accessed: Instant::now(),
        }
    }

    fn token_expiring(&self) -> bool {
        self.token_expires_at.is_some_and(|expires_at| {
            expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) <= Utc::now()
        })
    }
}

#[derive(Debug)]
struct Sessions {
    entries: HashMap<String, SessionEntry>,
    last_sweep: Instant,
}

/// Auth phase and outstanding OAuth `state` of each browser session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<Sessions>,
    state_ttl: Duration,
    session_ttl: Duration,
    capacity: usize,
}

impl SessionStore {
    /// `state_ttl` bounds sessions mid-authorization, `session_ttl` idle
    /// authenticated ones. At most `capacity` sessions are kept.
    pub fn new(state_ttl: Duration, session_ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(Sessions {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            state_ttl,
            session_ttl,
            capacity: capacity.max(1),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sessions> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, entry: &SessionEntry) -> bool {
        let ttl = match entry.flow.phase() {
            AuthPhase::Authenticated | AuthPhase::Expired => self.session_ttl,
            _ => self.state_ttl,
        };
        entry.last_accessed.elapsed() >= ttl
    }

    fn sweep(&self, sessions: &mut Sessions, force: bool) {
        if !force && sessions.last_sweep.elapsed() < SWEEP_INTERVAL {
            return;
        }
        let before = sessions.entries.len();
        sessions.entries.retain(|_, entry| !self.is_stale(entry));
        sessions.last_sweep = Instant::now();
        if sessions.entries.len() != before {
            debug!("Swept {} stale sessions", before - sessions.entries.len());
        }
    }

    fn make_room(&self, sessions: &mut Sessions) {
        if sessions.entries.len() < self.capacity {
            return;
        }
        self.sweep(sessions, true);
        if sessions.entries.len() < self.capacity {
            return;
        }
        let oldest = sessions
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            warn!("Session store full, evicting session {}", id);
            sessions.entries.remove(&id);
        }
    }

    /// Records a new authorization attempt for `session_id`, replacing any earlier state.
    pub fn begin_authorization(&self, session_id: &str, state: &str) -> Result<(), FlowError> {
        let mut sessions = self.write();
        self.sweep(&mut sessions, false);

        if sessions
            .entries
            .get(session_id)
            .is_some_and(|entry| self.is_stale(entry))
        {
            sessions.entries.remove(session_id);
        }
        if !sessions.entries.contains_key(session_id) {
            self.make_room(&mut sessions);
        }

        let entry = sessions
            .entries
            .entry(session_id.to_string())
            .or_insert_with(SessionEntry::new);
        entry.flow.apply(AuthEvent::RequestAuthorization)?;
        entry.pending_state = Some(state.to_string());
        entry.last_accessed = Instant::now();

        debug!("Issued OAuth state for session {}", session_id);
        Ok(())
    }

    /// Accepts a callback for `session_id` if it is awaiting one and `state` matches
    /// the issued value. The issued state is single use; a mismatch fails the session.
    pub fn receive_code(
        &self,
        session_id: &str,
        state: Option<&str>,
    ) -> Result<(), AuthenticationError> {
        let mut sessions = self.write();
        let Some(entry) = sessions.entries.get_mut(session_id) else {
            warn!("Callback for unknown session {}", session_id);
            return Err(FlowError::InvalidTransition {
                from: AuthPhase::Unauthenticated,
                event: AuthEvent::ReceiveCode,
            }
            .into());
        };

        let phase = entry.flow.phase();
        if phase != AuthPhase::AuthorizationRequested {
            return Err(FlowError::InvalidTransition {
                from: phase,
                event: AuthEvent::ReceiveCode,
            }
            .into());
        }

        let pending = entry.pending_state.take();
        let fresh = entry.last_accessed.elapsed() < self.state_ttl;
        if !fresh || state.is_none() || pending.as_deref() != state {
            warn!(
                "Rejected OAuth state for session {} (expired: {})",
                session_id, !fresh
            );
            entry.flow.fail();
            return Err(AuthenticationError::InvalidState);
        }

        entry.flow.apply(AuthEvent::ReceiveCode)?;
        entry.last_accessed = Instant::now();
        Ok(())
    }

    /// Marks a session ready to refresh: tokens must be within the refresh margin.
    pub fn begin_refresh(&self, session_id: &str) -> Result<(), FlowError> {
        let mut sessions = self.write();
        let Some(entry) = sessions.entries.get_mut(session_id) else {
            return Err(FlowError::InvalidTransition {
                from: AuthPhase::Unauthenticated,
                event: AuthEvent::RequestRefresh,
            });
        };

        if entry.flow.phase() == AuthPhase::Authenticated && entry.token_expiring() {
            entry.flow.apply(AuthEvent::TokenExpired)?;
        }
        entry.flow.apply(AuthEvent::RequestRefresh)?;
        entry.last_accessed = Instant::now();
        Ok(())
    }

    pub fn tokens_issued(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), FlowError> {
        let mut sessions = self.write();
        let Some(entry) = sessions.entries.get_mut(session_id) else {
            return Err(FlowError::InvalidTransition {
                from: AuthPhase::Unauthenticated,
                event: AuthEvent::TokensIssued,
            });
        };

        entry.flow.apply(AuthEvent::TokensIssued)?;
        entry.token_expires_at = Some(expires_at);
        entry.last_accessed = Instant::now();
        info!("Session {} authenticated until {}", session_id, expires_at);
        Ok(())
    }

    pub fn fail(&self, session_id: &str) {
        let mut sessions = self.write();
        if let Some(entry) = sessions.entries.get_mut(session_id) {
            entry.flow.fail();
            entry.pending_state = None;
            entry.token_expires_at = None;
        }
    }

    /// Current phase, reporting authenticated sessions past their token expiry as `Expired`.
    pub fn phase(&self, session_id: &str) -> AuthPhase {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.entries.get(session_id) {
            Some(entry) if self.is_stale(entry) => AuthPhase::Unauthenticated,
            Some(entry) => match entry.flow.phase() {
                AuthPhase::Authenticated
                    if entry.token_expires_at.is_some_and(|at| at <= Utc::now()) =>
                {
                    AuthPhase::Expired
                }
                phase => phase,
            },
            None => AuthPhase::Unauthenticated,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generate_session_id() -> String {
        Uuid::new_v4().to_string()
    }
}
