use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad credentials: {0}")]
    BadCredentials(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired for subject {0}")]
    ExpiredToken(String),

    #[error("No verification key known for device {0}")]
    UnknownIdentity(String),

    #[error("Key authority error: {0}")]
    KeyAuthority(String),

    #[error("Policy engine error: {0}")]
    PolicyEngine(String),

    #[error("Status sink error: {0}")]
    StatusSink(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::PolicyEngine(e.to_string())
    }
}
