//! Session Authorization Gateway.
//!
//! Sits between the broker core and the identity/policy services. For every
//! connection event the gateway answers "who is this, and are they allowed
//! to do this": it verifies bearer tokens on connect, translates topics
//! into resource paths, asks the policy engine per publish/subscribe
//! attempt, and force-closes sessions whose credentials have expired.
//!
//! Nothing is thrown across the broker boundary: every outcome is a
//! structured [`Decision`]. Any ambiguous or erroring authorization path
//! resolves to deny — the gateway never fails open.

pub mod session;


pub use session::{Session, SessionState};

use crate::config::{Config, GatewayConfig};
use crate::error::GatewayError;
use crate::identity::{HttpKeyAuthority, KeyCache, TokenVerifier};
use crate::metrics::GatewayMetrics;
use crate::policy::{ConsentResolver, HttpPolicyClient, PolicyApi, PolicyDecision};
use crate::resource::{translate, Intent};
use crate::status::{ConnectionStatus, HttpStatusSink, StatusSink};
use crate::types::ClientId;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

/// Handle the gateway uses to terminate a broker connection.
#[async_trait]
pub trait ConnectionControl: Send + Sync {
    async fn close(&self, client_id: &str);
}

/// Authorization outcome returned to the broker core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Stable, categorized denial reasons suitable for logging/diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Secret missing or malformed.
    BadCredentials,
    /// Signature or claim mismatch.
    InvalidToken,
    /// Token expiry passed; the connection is force-closed.
    ExpiredToken,
    /// The key authority has no key for the device.
    UnknownIdentity,
    /// The policy engine explicitly denied the operation.
    PolicyDeny { topic: String },
    /// The policy engine was unreachable, timed out or misbehaved.
    PolicyError,
    /// The consent fallback walked every candidate without success.
    ConsentFallbackExhausted,
    /// The session was already closing when the operation resolved.
    SessionClosed,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::BadCredentials => "BadCredentials",
            DenyReason::InvalidToken => "InvalidToken",
            DenyReason::ExpiredToken => "ExpiredToken",
            DenyReason::UnknownIdentity => "UnknownIdentity",
            DenyReason::PolicyDeny { .. } => "PolicyDeny",
            DenyReason::PolicyError => "PolicyError",
            DenyReason::ConsentFallbackExhausted => "ConsentFallbackExhausted",
            DenyReason::SessionClosed => "SessionClosed",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::PolicyDeny { topic } => write!(f, "PolicyDeny({topic})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Orchestrates identity verification, resource translation and policy
/// decisions behind the broker's authentication/authorization hooks, and
/// owns per-connection session state.
pub struct SessionGateway {
    config: GatewayConfig,
    verifier: Arc<TokenVerifier>,
    policy: Arc<dyn PolicyApi>,
    consent: ConsentResolver,
    status: Arc<dyn StatusSink>,
    control: Arc<dyn ConnectionControl>,
    sessions: DashMap<ClientId, Arc<Session>>,
    metrics: Arc<GatewayMetrics>,
}

impl SessionGateway {
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<TokenVerifier>,
        policy: Arc<dyn PolicyApi>,
        status: Arc<dyn StatusSink>,
        control: Arc<dyn ConnectionControl>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let consent = ConsentResolver::new(policy.clone());
        Self {
            config,
            verifier,
            policy,
            consent,
            status,
            control,
            sessions: DashMap::new(),
            metrics,
        }
    }

    /// Wire the gateway against the HTTP key authority, policy engine and
    /// status sink named in `config`.
    pub fn from_config(config: &Config, control: Arc<dyn ConnectionControl>) -> crate::Result<Self> {
        let timeout = Duration::from_millis(config.policy_engine.request_timeout_ms);

        let authority = Arc::new(HttpKeyAuthority::new(&config.key_authority.base_url, timeout)?);
        let keys = KeyCache::new(authority, config.key_authority.key_cache_capacity)?;
        let verifier = Arc::new(TokenVerifier::new(keys, &config.gateway.token_audience));

        let policy = Arc::new(HttpPolicyClient::new(
            &config.policy_engine.base_url,
            timeout,
            config.policy_engine.consent_page_size,
        )?);
        let status = Arc::new(HttpStatusSink::new(&config.status.base_url, timeout)?);
        let metrics = GatewayMetrics::new()?;

        Ok(Self::new(
            config.gateway.clone(),
            verifier,
            policy,
            status,
            control,
            metrics,
        ))
    }

    /// Authenticate a connecting client.
    ///
    /// The configured system account is trusted unconditionally: no secret
    /// check, no expiry, no later policy checks. Every other identity must
    /// present a verifiable bearer token as its secret.
    pub async fn authenticate(
        &self,
        client_id: &str,
        provided_id: &str,
        provided_secret: Option<&[u8]>,
    ) -> Decision {
        let session = self.session_or_create(client_id);
        session.begin_authentication();

        if provided_id == self.config.system_account_id {
            session.mark_privileged();
            self.metrics.auth_success.inc();
            info!(client_id, "system account session authenticated");
            return Decision::Allow;
        }

        let Some(secret) = provided_secret else {
            self.metrics.auth_failure.inc();
            debug!(client_id, provided_id, "missing secret");
            return Decision::Deny(DenyReason::BadCredentials);
        };
        let Ok(token) = std::str::from_utf8(secret) else {
            self.metrics.auth_failure.inc();
            debug!(client_id, provided_id, "secret is not valid UTF-8");
            return Decision::Deny(DenyReason::BadCredentials);
        };

        match self.verifier.verify(token, provided_id).await {
            Ok(claims) => {
                if !session.complete_authentication(Arc::from(claims.sub.as_str()), claims.exp) {
                    warn!(client_id, "session closed or re-authenticated during handshake");
                    return Decision::Deny(DenyReason::SessionClosed);
                }
                self.metrics.auth_success.inc();
                info!(client_id, subject = %claims.sub, "device session authenticated");
                Decision::Allow
            }
            Err(GatewayError::UnknownIdentity(device)) => {
                self.metrics.auth_failure.inc();
                warn!(client_id, device, "no verification key for device");
                Decision::Deny(DenyReason::UnknownIdentity)
            }
            Err(e) => {
                self.metrics.auth_failure.inc();
                warn!(client_id, provided_id, error = %e, "token verification failed");
                Decision::Deny(DenyReason::InvalidToken)
            }
        }
    }

    /// Authorize a publish attempt on `topic`.
    pub async fn authorize_publish(&self, client_id: &str, topic: &str) -> Decision {
        self.authorize(client_id, topic, Intent::Publish).await
    }

    /// Authorize a subscribe attempt on `topic`. A direct denial on a
    /// shared-property resource falls back to the consent walk before the
    /// final answer.
    pub async fn authorize_subscribe(&self, client_id: &str, topic: &str) -> Decision {
        self.authorize(client_id, topic, Intent::Subscribe).await
    }

    async fn authorize(&self, client_id: &str, topic: &str, intent: Intent) -> Decision {
        let timer = self.metrics.decision_latency.start_timer();
        let decision = self.authorize_inner(client_id, topic, intent).await;
        timer.observe_duration();

        let operation = match intent {
            Intent::Publish => "publish",
            Intent::Subscribe => "subscribe",
        };
        let outcome = match &decision {
            Decision::Allow => "Allow",
            Decision::Deny(reason) => reason.as_str(),
        };
        self.metrics
            .decisions
            .with_label_values(&[operation, outcome])
            .inc();
        decision
    }

    async fn authorize_inner(&self, client_id: &str, topic: &str, intent: Intent) -> Decision {
        let Some(session) = self.session(client_id) else {
            debug!(client_id, topic, "authorize call for unknown session");
            return Decision::Deny(DenyReason::BadCredentials);
        };

        if session.is_privileged() {
            return Decision::Allow;
        }
        if !session.is_open() {
            return Decision::Deny(DenyReason::SessionClosed);
        }

        let now = chrono::Utc::now().timestamp();
        if session.is_expired(now) {
            self.force_close(&session).await;
            return Decision::Deny(DenyReason::ExpiredToken);
        }

        let Some(subject) = session.subject() else {
            debug!(client_id, topic, "authorize call before authentication");
            return Decision::Deny(DenyReason::BadCredentials);
        };

        let request = translate(topic, intent);
        let decision = match self
            .policy
            .check(&subject, request.action, &request.resource)
            .await
        {
            Ok(PolicyDecision::Allow) => Decision::Allow,
            Ok(PolicyDecision::Deny) if intent == Intent::Subscribe => {
                self.subscribe_fallback(&subject, &request.resource, topic)
                    .await
            }
            Ok(PolicyDecision::Deny) => {
                debug!(client_id, %subject, topic, action = %request.action, "policy denied");
                Decision::Deny(DenyReason::PolicyDeny {
                    topic: topic.to_string(),
                })
            }
            Err(e) => {
                warn!(client_id, %subject, topic, error = %e, "policy engine error, denying");
                Decision::Deny(DenyReason::PolicyError)
            }
        };

        // A close issued while the check was in flight wins over any allow.
        if decision.is_allowed() && !session.is_open() {
            return Decision::Deny(DenyReason::SessionClosed);
        }
        decision
    }

    async fn subscribe_fallback(&self, subject: &str, resource: &str, topic: &str) -> Decision {
        match self.consent.resolve(subject, resource).await {
            Ok(Some(PolicyDecision::Allow)) => Decision::Allow,
            Ok(Some(PolicyDecision::Deny)) => {
                debug!(%subject, topic, "consent fallback exhausted");
                Decision::Deny(DenyReason::ConsentFallbackExhausted)
            }
            Ok(None) => Decision::Deny(DenyReason::PolicyDeny {
                topic: topic.to_string(),
            }),
            Err(e) => {
                warn!(%subject, topic, error = %e, "consent fallback error, denying");
                Decision::Deny(DenyReason::PolicyError)
            }
        }
    }

    /// Broker `ready` event: the connection is fully established.
    pub fn on_ready(&self, client_id: &str) {
        if let Some(session) = self.session(client_id) {
            if let Some(subject) = session.subject() {
                self.notify(&subject, ConnectionStatus::Connected);
            }
        }
    }

    /// Broker keepalive event. Privileged sessions are ignored; expired
    /// sessions are force-closed (at most once); live sessions emit a
    /// keepalive status notification.
    pub async fn on_ping(&self, client_id: &str) {
        let Some(session) = self.session(client_id) else {
            return;
        };
        if session.is_privileged() || !session.is_open() {
            return;
        }

        let now = chrono::Utc::now().timestamp();
        if session.is_expired(now) {
            self.force_close(&session).await;
            return;
        }
        if let Some(subject) = session.subject() {
            self.notify(&subject, ConnectionStatus::Ping);
        }
    }

    /// Broker `disconnect` event: destroy the session.
    pub fn on_disconnect(&self, client_id: &str) {
        if let Some((_, session)) = self.sessions.remove(client_id) {
            session.begin_close();
            self.metrics.active_sessions.dec();
            if let Some(subject) = session.subject() {
                self.notify(&subject, ConnectionStatus::Disconnected);
            }
            debug!(client_id, "session destroyed");
        }
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session(&self, client_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(client_id).map(|s| s.clone())
    }

    fn session_or_create(&self, client_id: &str) -> Arc<Session> {
        if let Some(session) = self.session(client_id) {
            return session;
        }
        let id: ClientId = Arc::from(client_id);
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| {
                self.metrics.active_sessions.inc();
                Arc::new(Session::new(id))
            })
            .clone()
    }

    /// Transition the session to `Disconnected` and ask the broker to drop
    /// the transport. The state change happens before the close request, so
    /// no authorize call can resolve to allow afterwards; the close itself
    /// is issued at most once per session.
    async fn force_close(&self, session: &Session) {
        if session.begin_close() {
            self.metrics.forced_closes.inc();
            warn!(client_id = session.client_id(), "credential expired, closing connection");
            self.control.close(session.client_id()).await;
        }
    }

    fn notify(&self, subject: &str, status: ConnectionStatus) {
        let sink = self.status.clone();
        let subject = subject.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.update_status(&subject, status).await {
                debug!(subject = %subject, error = %e, "status update dropped");
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn session_handle(&self, client_id: &str) -> Option<Arc<Session>> {
        self.session(client_id)
    }
}
