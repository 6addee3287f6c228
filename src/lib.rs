pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod resource;
pub mod status;
pub mod types;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway::{Decision, DenyReason, SessionGateway};
