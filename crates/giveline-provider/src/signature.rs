//! Webhook signature verification: hex-encoded HMAC-SHA256 over the raw
//! request body with the shared webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison against the presented hex signature. Malformed
/// hex is simply a mismatch, never an error.
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(presented) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&presented).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"source.chargeable","id":"evt_1"}"#;
        let signature = sign(SECRET, body);
        assert!(verify(SECRET, body, &signature));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"type":"source.chargeable","id":"evt_1"}"#;
        let signature = sign("wrong_secret", body);
        assert!(!verify(SECRET, body, &signature));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = br#"{"type":"source.chargeable","id":"evt_1"}"#;
        let tampered = br#"{"type":"source.chargeable","id":"evt_1","amount":1}"#;
        let signature = sign(SECRET, body);
        assert!(!verify(SECRET, tampered, &signature));
    }

    #[test]
    fn malformed_hex_is_a_mismatch_not_a_panic() {
        assert!(!verify(SECRET, b"{}", "not-hex-at-all"));
        assert!(!verify(SECRET, b"{}", ""));
    }
}
