use std::sync::Arc;

/// Broker-assigned connection identifier.
pub type ClientId = Arc<str>;

/// Stable device ("thing") identifier, also the JWT subject.
pub type DeviceId = Arc<str>;
