//! Authorization lifecycle of a single user session.
//!
//! ```text
//! Unauthenticated -> AuthorizationRequested -> CodeReceived -> Authenticated
//!                                                    Authenticated -> Expired -> RefreshRequested -> Authenticated
//! ```
//!
//! A new authorization may be requested from any settled phase (not while a code or
//! refresh exchange is in flight). `Failed` can be entered from any phase and is
//! absorbing: the session has to be replaced.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Unauthenticated,
    AuthorizationRequested,
    CodeReceived,
    Authenticated,
    Expired,
    RefreshRequested,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    RequestAuthorization,
    ReceiveCode,
    TokensIssued,
    TokenExpired,
    RequestRefresh,
    Fail,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Cannot apply {event} while {from}")]
    InvalidTransition { from: AuthPhase, event: AuthEvent },
}

#[derive(Debug, Clone)]
pub struct AuthFlow {
    phase: AuthPhase,
}

impl Default for AuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthFlow {
    pub fn new() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
        }
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn apply(&mut self, event: AuthEvent) -> Result<AuthPhase, FlowError> {
        use AuthEvent::*;
        use AuthPhase::*;

        let next = match (self.phase, event) {
            (Failed, _) => None,
            (_, Fail) => Some(Failed),
            (Unauthenticated | AuthorizationRequested | Authenticated | Expired, RequestAuthorization) => {
                Some(AuthorizationRequested)
            }
            (AuthorizationRequested, ReceiveCode) => Some(CodeReceived),
            (CodeReceived, TokensIssued) => Some(Authenticated),
            (Authenticated, TokenExpired) => Some(Expired),
            (Expired, RequestRefresh) => Some(RefreshRequested),
            (RefreshRequested, TokensIssued) => Some(Authenticated),
            _ => None,
        };

        let next = next.ok_or(FlowError::InvalidTransition {
            from: self.phase,
            event,
        })?;
        debug!("Auth flow: {} --{}--> {}", self.phase, event, next);
        self.phase = next;
        Ok(next)
    }

    /// Enters `Failed`. Never errors, since every phase may fail.
    pub fn fail(&mut self) {
        if self.phase != AuthPhase::Failed {
            debug!("Auth flow: {} --Fail--> Failed", self.phase);
            self.phase = AuthPhase::Failed;
        }
    }
}
