//! Webhook signature verification (HMAC-SHA256, hex encoded).
//!
//! Verification is constant-time via the `hmac` crate's `verify_slice`;
//! never compare digests with `==`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AutoPrError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 signature for a body.
///
/// Used by tests and by outbound webhook sinks that sign their payloads.
pub fn sign_hex(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Verify a hex HMAC-SHA256 signature against a body.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> Result<()> {
    let expected = decode_hex(signature_hex)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| AutoPrError::Internal {
            details: format!("hmac init: {}", e),
        })?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AutoPrError::InvalidSignature {
            event_source: String::new(),
        })
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AutoPrError::InvalidSignature {
            event_source: String::new(),
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| AutoPrError::InvalidSignature {
                event_source: String::new(),
            })
        })
        .collect()
}
