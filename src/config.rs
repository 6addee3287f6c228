use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub key_authority: KeyAuthorityConfig,
    pub policy_engine: PolicyEngineConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identifier of the single globally-trusted system account.
    pub system_account_id: String,
    /// Credential for provisioning the system account on the broker side.
    /// The gateway itself never checks it.
    pub system_account_secret: Option<String>,
    /// Audience claim every device token must carry.
    pub token_audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAuthorityConfig {
    pub base_url: String,
    /// Upper bound on cached device verification keys.
    #[serde(default = "default_key_cache_capacity")]
    pub key_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEngineConfig {
    pub base_url: String,
    /// Budget for a single policy-engine round trip; exceeding it is a deny.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Page size used when accumulating consent listings.
    #[serde(default = "default_consent_page_size")]
    pub consent_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub base_url: String,
}

fn default_key_cache_capacity() -> usize {
    1024
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_consent_page_size() -> usize {
    50
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.system_account_id.is_empty() {
            return Err(crate::error::GatewayError::Config(
                "gateway.system_account_id cannot be empty".to_string(),
            ));
        }

        if self.gateway.token_audience.is_empty() {
            return Err(crate::error::GatewayError::Config(
                "gateway.token_audience cannot be empty".to_string(),
            ));
        }

        if self.key_authority.key_cache_capacity == 0 {
            return Err(crate::error::GatewayError::Config(
                "key_authority.key_cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.policy_engine.request_timeout_ms == 0 {
            return Err(crate::error::GatewayError::Config(
                "policy_engine.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.policy_engine.consent_page_size == 0 {
            return Err(crate::error::GatewayError::Config(
                "policy_engine.consent_page_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
