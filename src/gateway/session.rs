//! Per-connection session state.
//!
//! One `Session` exists per live broker connection. The subject is set
//! exactly once, inside a successful authentication, and never derived
//! from client-supplied values afterwards. State only moves forward:
//! `Connecting → Authenticating → Authenticated → Disconnected`.

use crate::types::{ClientId, DeviceId};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authenticated,
    Disconnected,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    subject: Option<DeviceId>,
    token_expiry: Option<i64>,
    privileged: bool,
}

#[derive(Debug)]
pub struct Session {
    client_id: ClientId,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                subject: None,
                token_expiry: None,
                privileged: false,
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn subject(&self) -> Option<DeviceId> {
        self.inner.lock().subject.clone()
    }

    pub fn token_expiry(&self) -> Option<i64> {
        self.inner.lock().token_expiry
    }

    pub fn is_privileged(&self) -> bool {
        self.inner.lock().privileged
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().state != SessionState::Disconnected
    }

    /// Whether the session's credential has expired at `now` (epoch
    /// seconds). Privileged sessions never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        let inner = self.inner.lock();
        !inner.privileged && inner.token_expiry.map_or(false, |exp| exp <= now)
    }

    pub fn begin_authentication(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Connecting {
            inner.state = SessionState::Authenticating;
        }
    }

    /// Mark the session as the globally-trusted system account.
    pub fn mark_privileged(&self) {
        let mut inner = self.inner.lock();
        inner.privileged = true;
        inner.state = SessionState::Authenticated;
    }

    /// Record a verified identity. Fails (returns false) if the session is
    /// already closed or a subject was set before.
    pub fn complete_authentication(&self, subject: DeviceId, token_expiry: i64) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disconnected || inner.subject.is_some() {
            return false;
        }
        inner.subject = Some(subject);
        inner.token_expiry = Some(token_expiry);
        inner.state = SessionState::Authenticated;
        true
    }

    /// Transition to `Disconnected`. Returns true only for the caller that
    /// performed the transition, so a close is issued at most once.
    pub fn begin_close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disconnected {
            false
        } else {
            inner.state = SessionState::Disconnected;
            true
        }
    }

    #[cfg(test)]
    pub fn set_token_expiry(&self, token_expiry: i64) {
        self.inner.lock().token_expiry = Some(token_expiry);
    }
}
