//! Device identity: verification-key retrieval/caching and bearer-token
//! verification.

pub mod cache;
pub mod verifier;

pub use cache::{HttpKeyAuthority, KeyAuthority, KeyCache};
pub use verifier::{DeviceClaims, TokenVerifier};
