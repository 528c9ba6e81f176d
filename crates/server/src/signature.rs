//! `X-Hub-Signature-256` verification: `sha256=` followed by the hex
//! HMAC-SHA256 of the raw request body keyed with the webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn mac(secret: &[u8], body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::Signature(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Header value GitHub would send for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{}{}", PREFIX, hex::encode(digest)))
}

pub fn verify(secret: &[u8], header: Option<&str>, body: &[u8]) -> Result<(), WebhookError> {
    let header = header.ok_or_else(|| WebhookError::Signature("missing X-Hub-Signature-256".into()))?;
    let hex_digest = header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| WebhookError::Signature("unsupported signature scheme".into()))?;
    let expected = hex::decode(hex_digest).map_err(|e| WebhookError::Signature(e.to_string()))?;
    mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::Signature("digest mismatch".into()))
}
