//! Webhook signature verification.
//!
//! Deliveries carry `X-Hub-Signature-256: sha256=<hex>`, an HMAC-SHA256
//! of the raw body under the shared secret. Verification is constant
//! time via the MAC comparison; a mismatch yields a bare 401 upstream.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies a delivery signature against the raw body.
///
/// Returns false for a malformed header, bad hex, or a MAC mismatch;
/// callers cannot distinguish which.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(digest) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&digest).is_ok()
}

/// Signs a body the way a sender would. Test and tooling helper.
#[must_use]
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_signature_verifies() {
        let body = br#"{"eventType":"push"}"#;
        let signature = sign_body("shared-secret", body);
        assert!(verify_signature("shared-secret", body, &signature));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let signature = sign_body("secret-a", body);
        assert!(!verify_signature("secret-b", body, &signature));
    }

    #[test]
    fn tampered_body_fails() {
        let signature = sign_body("shared-secret", b"payload");
        assert!(!verify_signature("shared-secret", b"payload2", &signature));
    }

    #[test]
    fn malformed_headers_fail_closed() {
        assert!(!verify_signature("s", b"body", "sha256=zz-not-hex"));
        assert!(!verify_signature("s", b"body", "md5=abcdef"));
        assert!(!verify_signature("s", b"body", ""));
    }
}
