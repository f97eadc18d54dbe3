//! Webhook trigger secrets.
//!
//! The configured secret is stored as `salt$sha256(salt + secret)` and
//! verified with a constant-time digest compare, so neither the stored form
//! nor the comparison leaks the secret.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash a webhook secret for storage.
pub fn hash_webhook_secret(secret: &str) -> String {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let digest = Sha256::digest(format!("{salt}{secret}").as_bytes());
    format!("{salt}${}", hex::encode(digest))
}

/// Verify a presented secret against its stored hash.
pub fn verify_webhook_secret(secret: &str, stored: &str) -> bool {
    let Some((salt, expected_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let actual = Sha256::digest(format!("{salt}{secret}").as_bytes());
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let stored = hash_webhook_secret("whsec_12345");
        assert!(verify_webhook_secret("whsec_12345", &stored));
    }

    #[test]
    fn wrong_secret_fails() {
        let stored = hash_webhook_secret("whsec_12345");
        assert!(!verify_webhook_secret("whsec_other", &stored));
    }

    #[test]
    fn same_secret_hashes_differently_per_salt() {
        let a = hash_webhook_secret("whsec_12345");
        let b = hash_webhook_secret("whsec_12345");
        assert_ne!(a, b);
        assert!(verify_webhook_secret("whsec_12345", &a));
        assert!(verify_webhook_secret("whsec_12345", &b));
    }

    #[test]
    fn malformed_stored_value_fails_closed() {
        assert!(!verify_webhook_secret("s", "no-dollar-separator"));
        assert!(!verify_webhook_secret("s", "salt$not-hex!"));
        assert!(!verify_webhook_secret("s", ""));
    }
}
