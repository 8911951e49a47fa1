//! HMAC-SHA256 webhook signatures over canonical JSON

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{AppError, Result};
use crate::utils::canonical_json;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies webhook bodies with the shared secret
#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}

impl WebhookSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("HMAC key rejected: {}", e)))
    }

    /// Hex digest over already-canonical bytes
    pub fn sign_bytes(&self, canonical: &[u8]) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(canonical);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Hex digest over the canonical form of `payload`
    pub fn sign(&self, payload: &Value) -> Result<String> {
        self.sign_bytes(&canonical_json(payload)?)
    }

    /// Check a signature header against canonical bytes.
    ///
    /// The header is hex, optionally prefixed with `sha256=`. The digest
    /// comparison is constant time (`Mac::verify_slice`).
    pub fn verify(&self, canonical: &[u8], signature_header: &str) -> bool {
        let trimmed = signature_header.trim();
        let hex_part = trimmed.strip_prefix("sha256=").unwrap_or(trimmed);

        let provided = match hex::decode(hex_part) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut mac = match self.mac() {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(canonical);
        mac.verify_slice(&provided).is_ok()
    }
}
