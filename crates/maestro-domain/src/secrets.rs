//! Secrets at rest.
//!
//! API keys are encrypted with AES-256-GCM under a master key supplied as
//! base64 in the environment.  The stored form is
//! `base64(nonce || ciphertext)`; the nonce is fresh per encryption, so
//! encrypting the same key twice yields different ciphertexts.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Symmetric cipher bound to the process master key.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Build from the base64-encoded 32-byte master key.
    pub fn from_master_key(master_key_b64: &str) -> Result<Self> {
        let key_bytes = STANDARD
            .decode(master_key_b64.trim())
            .map_err(|_| Error::Validation("master key is not valid base64".into()))?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|_| Error::Validation("master key must decode to 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext API key for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Internal(anyhow::anyhow!("encryption failed")))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a stored API key.  Fails on tampering or a wrong master key.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let blob = STANDARD
            .decode(stored.trim())
            .map_err(|_| Error::Validation("stored secret is not valid base64".into()))?;
        if blob.len() < NONCE_LEN {
            return Err(Error::Validation("stored secret is truncated".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Authentication("secret decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Internal(anyhow::anyhow!("decrypted secret is not UTF-8")))
    }
}

/// Generate a fresh base64 master key suitable for the environment.
pub fn generate_master_key() -> String {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    STANDARD.encode(key)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_box() -> SecretBox {
        SecretBox::from_master_key(&generate_master_key()).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips_utf8() {
        let sb = secret_box();
        for plain in ["sk-abc123", "", "clé-API-éçü", "emoji 🔑 key", "line\nbreak"] {
            let stored = sb.encrypt(plain).unwrap();
            assert_eq!(sb.decrypt(&stored).unwrap(), plain);
        }
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let sb = secret_box();
        let a = sb.encrypt("sk-abc").unwrap();
        let b = sb.encrypt("sk-abc").unwrap();
        assert_ne!(a, b, "nonce must be fresh per encryption");
    }

    #[test]
    fn wrong_master_key_fails_decryption() {
        let a = secret_box();
        let b = secret_box();
        let stored = a.encrypt("sk-abc").unwrap();
        assert!(b.decrypt(&stored).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let sb = secret_box();
        let stored = sb.encrypt("sk-abc").unwrap();
        let mut blob = STANDARD.decode(&stored).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = STANDARD.encode(blob);
        assert!(sb.decrypt(&tampered).is_err());
    }

    #[test]
    fn invalid_master_key_is_rejected() {
        assert!(SecretBox::from_master_key("not base64!!!").is_err());
        assert!(SecretBox::from_master_key(&STANDARD.encode([0u8; 16])).is_err());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let sb = secret_box();
        assert!(sb.decrypt(&STANDARD.encode([0u8; 4])).is_err());
    }
}
