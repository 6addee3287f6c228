//! Connection status notifications.
//!
//! The gateway reports lifecycle transitions to an external status sink.
//! These are purely observational: the sink is a decoupled subscriber and
//! its failures never change an authorization outcome.

use crate::error::{GatewayError, Result};

use async_trait::async_trait;

/// Status values reported for a device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Ping,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Ping => "Ping",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_status(&self, subject: &str, status: ConnectionStatus) -> Result<()>;
}

/// Sink that drops every notification. Useful when no hub API is wired up.
pub struct NoopStatusSink;

#[async_trait]
impl StatusSink for NoopStatusSink {
    async fn update_status(&self, _subject: &str, _status: ConnectionStatus) -> Result<()> {
        Ok(())
    }
}

/// Sink posting statuses to the hub HTTP API.
pub struct HttpStatusSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSink {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::StatusSink(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn update_status(&self, subject: &str, status: ConnectionStatus) -> Result<()> {
        let url = format!("{}/things/{}/status", self.base_url, subject);
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "status": status.as_str() }))
            .send()
            .await
            .map_err(|e| GatewayError::StatusSink(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::StatusSink(format!(
                "status update for {} returned {}",
                subject,
                response.status()
            )));
        }
        Ok(())
    }
}
