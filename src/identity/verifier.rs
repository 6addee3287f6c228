//! Bearer-token verification against cached device keys.

use crate::error::{GatewayError, Result};
use crate::identity::cache::KeyCache;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a device bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub sub: String,
    pub aud: String,
    /// Expiry as epoch seconds.
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Verifies device tokens: RS256 signature against the cached key plus the
/// subject / audience / expiry claims.
pub struct TokenVerifier {
    keys: KeyCache,
    audience: String,
}

impl TokenVerifier {
    pub fn new(keys: KeyCache, audience: impl Into<String>) -> Self {
        Self {
            keys,
            audience: audience.into(),
        }
    }

    /// Decode and verify `token` for `device_id`, returning the claims.
    ///
    /// A signature failure can mean the cached key is stale (the device was
    /// re-provisioned); the entry is invalidated and the fetch-and-verify
    /// cycle retried exactly once. A second failure is terminal.
    pub async fn verify(&self, token: &str, device_id: &str) -> Result<DeviceClaims> {
        match self.verify_once(token, device_id).await {
            Err(VerifyFailure::StaleKey) => {
                tracing::debug!(device_id, "signature mismatch, re-fetching key once");
                self.keys.invalidate(device_id);
                self.verify_once(token, device_id).await.map_err(|e| match e {
                    VerifyFailure::StaleKey => {
                        GatewayError::InvalidToken("signature verification failed".to_string())
                    }
                    VerifyFailure::Fatal(e) => e,
                })
            }
            Err(VerifyFailure::Fatal(e)) => Err(e),
            Ok(claims) => Ok(claims),
        }
    }

    async fn verify_once(
        &self,
        token: &str,
        device_id: &str,
    ) -> std::result::Result<DeviceClaims, VerifyFailure> {
        let identity = self
            .keys
            .get(device_id)
            .await
            .map_err(VerifyFailure::Fatal)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_audience(&[&self.audience]);
        validation.sub = Some(device_id.to_string());
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        let data = decode::<DeviceClaims>(token, &identity.key, &validation)
            .map_err(|e| classify(e.kind()))?;
        Ok(data.claims)
    }
}

/// Distinguishes "the cached key may be stale" from claim failures no
/// refetch can fix.
enum VerifyFailure {
    StaleKey,
    Fatal(GatewayError),
}

fn classify(kind: &ErrorKind) -> VerifyFailure {
    match kind {
        ErrorKind::InvalidSignature => VerifyFailure::StaleKey,
        ErrorKind::ExpiredSignature => {
            VerifyFailure::Fatal(GatewayError::InvalidToken("token has expired".to_string()))
        }
        ErrorKind::InvalidAudience => {
            VerifyFailure::Fatal(GatewayError::InvalidToken("audience mismatch".to_string()))
        }
        ErrorKind::InvalidSubject => {
            VerifyFailure::Fatal(GatewayError::InvalidToken("subject mismatch".to_string()))
        }
        ErrorKind::MissingRequiredClaim(claim) => VerifyFailure::Fatal(GatewayError::InvalidToken(
            format!("missing required claim {claim}"),
        )),
        other => VerifyFailure::Fatal(GatewayError::InvalidToken(format!("{other:?}"))),
    }
}
