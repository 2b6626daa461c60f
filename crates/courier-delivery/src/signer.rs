//! HMAC-SHA256 payload signing.
//!
//! Outbound deliveries carry `X-Webhook-Signature: sha256=<hex>`, the HMAC
//! of the raw request body keyed with the webhook's secret. Receivers
//! recompute it over the bytes they received; `verify` is the reference
//! implementation of that check.
//!
//! # Example
//!
//! ```
//! use courier_delivery::signer::{sign, verify};
//!
//! let body = br#"{"event":"order.paid"}"#;
//! let signature = sign("whsec_example", body).unwrap();
//!
//! assert!(signature.starts_with("sha256="));
//! assert!(verify("whsec_example", body, &signature));
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Prefix identifying the signature scheme.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Prefix of generated secrets.
pub const SECRET_PREFIX: &str = "whsec_";

/// Signing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The webhook has no secret to sign with.
    #[error("signing secret is empty")]
    EmptySecret,

    /// The key could not initialise the MAC.
    #[error("signing secret rejected: {0}")]
    InvalidKey(String),
}

/// Signs `payload` with `secret`.
///
/// Returns `sha256=` followed by the lowercase hex HMAC-SHA256 digest. The
/// result depends only on the secret and the exact payload bytes.
///
/// # Errors
///
/// Returns `SignatureError::EmptySecret` for an empty secret.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mac = keyed_mac(secret, payload)?;
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks `signature` against `payload` in constant time.
///
/// Accepts `sha256=<hex>` or a bare 64 character hex digest. Any malformed
/// input, including an empty secret, yields `false`.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(expected) = parse_signature(signature) else {
        return false;
    };

    keyed_mac(secret, payload).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
}

/// Generates a random signing secret: `whsec_` plus 32 random bytes,
/// base64url encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn keyed_mac(secret: &str, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(mac)
}

fn parse_signature(signature: &str) -> Option<Vec<u8>> {
    let digest = signature.trim();
    let digest = digest.strip_prefix(SIGNATURE_PREFIX).unwrap_or(digest);

    if digest.len() != 64 {
        return None;
    }

    hex::decode(digest).ok()
}
