//! The encrypted-string carrier.
//!
//! A marker-prefixed ciphertext acts as the sum type
//! `Plaintext(s) | Ciphertext(s)`: every boundary checks the tag before
//! use. Sealed values are AES-256-GCM with a random nonce, keyed from the
//! operator's internal secret.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::models::CredentialValue;

const NONCE_LEN: usize = 12;

/// Seals and opens credential envelopes
pub struct CredentialBox {
    cipher: Aes256Gcm,
}

impl CredentialBox {
    /// Derive the AEAD key from the operator secret
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt into the tagged envelope form `enc:v1:<b64(nonce||ct)>`
    pub fn seal(&self, plaintext: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| format!("encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(format!(
            "{}{}",
            CredentialValue::CIPHERTEXT_PREFIX,
            URL_SAFE_NO_PAD.encode(combined)
        ))
    }

    /// Open an envelope; a value without the marker prefix is already
    /// plaintext and passes through unchanged
    pub fn open(&self, value: &str) -> Result<String, String> {
        let Some(encoded) = value.strip_prefix(CredentialValue::CIPHERTEXT_PREFIX) else {
            return Ok(value.to_string());
        };

        let combined = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|e| format!("envelope is not valid base64: {e}"))?;
        if combined.len() <= NONCE_LEN {
            return Err("envelope too short".to_string());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| "envelope failed to decrypt".to_string())?;
        String::from_utf8(plaintext).map_err(|e| format!("envelope is not UTF-8: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let secrets = CredentialBox::new("operator-secret");
        let sealed = secrets.seal("api-key-12345").unwrap();
        assert!(sealed.starts_with(CredentialValue::CIPHERTEXT_PREFIX));
        assert_eq!(secrets.open(&sealed).unwrap(), "api-key-12345");
    }

    #[test]
    fn plaintext_passes_through_untagged() {
        let secrets = CredentialBox::new("operator-secret");
        assert_eq!(secrets.open("plain-value").unwrap(), "plain-value");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = CredentialBox::new("secret-a").seal("value").unwrap();
        assert!(CredentialBox::new("secret-b").open(&sealed).is_err());
    }

    #[test]
    fn tampered_envelopes_fail() {
        let secrets = CredentialBox::new("operator-secret");
        let sealed = secrets.seal("value").unwrap();
        let mut tampered = sealed.clone();
        tampered.push('A');
        assert!(secrets.open(&tampered).is_err());
    }
}
