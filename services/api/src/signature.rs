//! services/api/src/signature.rs
//!
//! HMAC-SHA256 checks for signed provider webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Checks `signature` against the HMAC-SHA256 of `body` keyed by `secret`.
///
/// Accepts `sha256=<hex>` or bare hex, in either case. Comparison is constant-time.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA256 of `body`, as a provider would send it.
pub fn sign_hmac_sha256(secret: &[u8], body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prefixed_and_bare_signatures() {
        let body = br#"{"topic":"buygoods_transaction_received"}"#;
        let sig = sign_hmac_sha256(b"secret", body);
        assert!(verify_hmac_sha256(b"secret", body, &sig));
        assert!(verify_hmac_sha256(b"secret", body, &format!("sha256={sig}")));
        assert!(verify_hmac_sha256(b"secret", body, &sig.to_uppercase()));
    }

    #[test]
    fn rejects_tampering_and_garbage() {
        let body = b"{}";
        let sig = sign_hmac_sha256(b"secret", body);
        assert!(!verify_hmac_sha256(b"other", body, &sig));
        assert!(!verify_hmac_sha256(b"secret", b"{ }", &sig));
        assert!(!verify_hmac_sha256(b"secret", body, "not-hex"));
        assert!(!verify_hmac_sha256(b"secret", body, ""));
    }
}
