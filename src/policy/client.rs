//! Thin, stateless client for the external policy engine.
//!
//! Every call is a single bounded HTTP round trip. The client reports
//! transport and server failures as errors; the gateway resolves those to
//! deny (fail-closed) and never retries automatically.

use crate::error::{GatewayError, Result};
use crate::policy::consent::ConsentGrant;
use crate::resource::Action;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a single policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

#[async_trait]
pub trait PolicyApi: Send + Sync {
    /// Ask the engine whether `subject` may perform `action` on `resource`.
    async fn check(&self, subject: &str, action: Action, resource: &str)
        -> Result<PolicyDecision>;

    /// Accumulate every consent grant stored for `resource`.
    async fn list_consents(&self, resource: &str) -> Result<Vec<ConsentGrant>>;

    /// Whether `member` belongs to the group identified by `group`.
    async fn check_group_membership(&self, member: &str, group: &str) -> Result<bool>;
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    subject: &'a str,
    action: &'a str,
    resource: &'a str,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    id: String,
}

/// HTTP policy engine client.
pub struct HttpPolicyClient {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
}

impl HttpPolicyClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: std::time::Duration,
        page_size: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::PolicyEngine(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            page_size,
        })
    }
}

#[async_trait]
impl PolicyApi for HttpPolicyClient {
    async fn check(
        &self,
        subject: &str,
        action: Action,
        resource: &str,
    ) -> Result<PolicyDecision> {
        let url = format!("{}/check", self.base_url);
        let body = CheckRequest {
            subject,
            action: action.as_str(),
            resource,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::PolicyEngine(format!("check failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(PolicyDecision::Allow)
        } else if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            Ok(PolicyDecision::Deny)
        } else {
            Err(GatewayError::PolicyEngine(format!(
                "check returned status {status}"
            )))
        }
    }

    async fn list_consents(&self, resource: &str) -> Result<Vec<ConsentGrant>> {
        let mut grants = Vec::new();
        let mut offset = 0usize;

        loop {
            let url = format!(
                "{}/policies?resource={}&limit={}&offset={}",
                self.base_url, resource, self.page_size, offset
            );
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| GatewayError::PolicyEngine(format!("consent listing failed: {e}")))?;

            if !response.status().is_success() {
                return Err(GatewayError::PolicyEngine(format!(
                    "consent listing returned status {}",
                    response.status()
                )));
            }

            let page: Vec<ConsentGrant> = response.json().await.map_err(|e| {
                GatewayError::PolicyEngine(format!("malformed consent page: {e}"))
            })?;

            let page_len = page.len();
            grants.extend(page);
            if page_len < self.page_size {
                return Ok(grants);
            }
            offset += page_len;
        }
    }

    async fn check_group_membership(&self, member: &str, group: &str) -> Result<bool> {
        let url = format!("{}/roles?member={}", self.base_url, member);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::PolicyEngine(format!("membership lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::PolicyEngine(format!(
                "membership lookup returned status {}",
                response.status()
            )));
        }

        let roles: Vec<RoleEntry> = response
            .json()
            .await
            .map_err(|e| GatewayError::PolicyEngine(format!("malformed role listing: {e}")))?;
        Ok(roles.iter().any(|r| r.id == group))
    }
}
