//! Cipher executors used to protect cached credentials.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const CLEARPASS_AAD: &[u8] = b"portero-clearpass:v1";

pub trait CipherExecutor: Send + Sync {
    /// # Errors
    /// Returns an error if the payload cannot be encrypted.
    fn encrypt_and_sign(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// # Errors
    /// Returns an error if the payload was tampered with or cannot be decrypted.
    fn verify_and_decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Whether the executor actually protects its output.
    fn is_enabled(&self) -> bool;
}

/// Identity transform. Consumers treat it as "crypto disabled".
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCipherExecutor;

impl CipherExecutor for NoOpCipherExecutor {
    fn encrypt_and_sign(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn verify_and_decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// `ChaCha20-Poly1305` executor for clearpass. Output is `nonce (12 bytes) || ciphertext`.
pub struct CacheCredentialsCipherExecutor {
    cipher: ChaCha20Poly1305,
}

impl CacheCredentialsCipherExecutor {
    /// # Errors
    /// Returns an error if the key is not 32 bytes long.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(anyhow!(
                "Invalid clearpass key length: expected {KEY_LEN} bytes, got {}",
                key.len()
            ));
        }
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        })
    }

    /// Build from a base64 (standard alphabet) encoded key.
    ///
    /// # Errors
    /// Returns an error if the key is not valid base64 or has the wrong length.
    pub fn from_base64(key: &SecretString) -> Result<Self> {
        let bytes = Base64::decode_vec(key.expose_secret().trim())
            .map_err(|e| anyhow!("Invalid clearpass key encoding: {e}"))?;
        Self::new(&bytes)
    }
}

impl fmt::Debug for CacheCredentialsCipherExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCredentialsCipherExecutor")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl CipherExecutor for CacheCredentialsCipherExecutor {
    fn encrypt_and_sign(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .context("failed to generate clearpass nonce")?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: CLEARPASS_AAD,
                },
            )
            .map_err(|e| anyhow!("Encryption failure: {e}"))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn verify_and_decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(anyhow!("Invalid ciphertext length"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: CLEARPASS_AAD,
                },
            )
            .map_err(|e| anyhow!("Decryption failure: {e}"))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_identity_and_disabled() -> Result<()> {
        let cipher = NoOpCipherExecutor;
        assert!(!cipher.is_enabled());
        assert_eq!(cipher.encrypt_and_sign(b"Mellon")?, b"Mellon");
        assert_eq!(cipher.verify_and_decrypt(b"Mellon")?, b"Mellon");
        Ok(())
    }

    #[test]
    fn clearpass_cipher_hides_plaintext() -> Result<()> {
        let cipher = CacheCredentialsCipherExecutor::new(&[42u8; 32])?;
        let encrypted = cipher.encrypt_and_sign(b"Mellon")?;
        assert_ne!(encrypted, b"Mellon");
        assert_eq!(cipher.verify_and_decrypt(&encrypted)?, b"Mellon");
        Ok(())
    }

    #[test]
    fn clearpass_cipher_detects_tampering() -> Result<()> {
        let cipher = CacheCredentialsCipherExecutor::new(&[42u8; 32])?;
        let mut encrypted = cipher.encrypt_and_sign(b"Mellon")?;
        let len = encrypted.len();
        if let Some(byte) = encrypted.get_mut(len - 1) {
            *byte ^= 0xFF;
        }
        assert!(cipher.verify_and_decrypt(&encrypted).is_err());
        assert!(cipher.verify_and_decrypt(&[1, 2, 3]).is_err());
        Ok(())
    }

    #[test]
    fn clearpass_key_must_be_32_bytes() {
        assert!(CacheCredentialsCipherExecutor::new(&[1u8; 16]).is_err());
        let short = SecretString::from(Base64::encode_string(&[1u8; 8]));
        assert!(CacheCredentialsCipherExecutor::from_base64(&short).is_err());
        let good = SecretString::from(Base64::encode_string(&[1u8; 32]));
        assert!(CacheCredentialsCipherExecutor::from_base64(&good).is_ok());
    }
}
