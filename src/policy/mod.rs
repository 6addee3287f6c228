//! Policy engine access: decision checks, consent listings, group
//! membership, and the cross-tenant consent fallback.

pub mod client;
pub mod consent;

pub use client::{HttpPolicyClient, PolicyApi, PolicyDecision};
pub use consent::{ConsentGrant, ConsentResolver, Effect};
