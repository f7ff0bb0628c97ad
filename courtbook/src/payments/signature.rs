//! Webhook signature verification.
//!
//! Gateways sign the raw request body with HMAC-SHA256 using the shared
//! webhook secret and send the hex digest in a header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against `payload`.
///
/// Surrounding whitespace and a `sha256=` prefix are accepted; hex case is
/// ignored. Empty secrets and empty signatures never verify.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(provided) = hex::decode(provided.to_ascii_lowercase()) else {
        return false;
    };
    if provided.is_empty() {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_courtbook_test";

    #[test]
    fn test_valid_signature_verifies() {
        let body = br#"{"event":"PAYMENT_RECEIVED","payment":{"id":"pay_1"}}"#;
        let signature = sign(SECRET, body);

        assert!(verify(SECRET, body, &signature));
        assert!(verify(SECRET, body, &signature.to_uppercase()));
        assert!(verify(SECRET, body, &format!("sha256={signature}")));
    }

    #[test]
    fn test_tampered_body_or_wrong_secret_fails() {
        let body = br#"{"event":"PAYMENT_RECEIVED"}"#;
        let signature = sign(SECRET, body);

        assert!(!verify(SECRET, br#"{"event":"PAYMENT_REFUNDED"}"#, &signature));
        assert!(!verify("another_secret", body, &signature));
        assert!(!verify(SECRET, body, "not-hex"));
        assert!(!verify(SECRET, body, ""));
        assert!(!verify("", body, &signature));
    }
}
