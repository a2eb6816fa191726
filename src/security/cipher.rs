use crate::error::CredentialError;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::{engine::general_purpose, Engine as _};
use std::env;

/// Environment variable holding the at-rest encryption key
pub const ENCRYPTION_KEY_VAR: &str = "ENCRYPTION_KEY";

const NONCE_SIZE: usize = 12;

/// Encrypt/decrypt-at-rest capability for stored exchange credentials
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialError>;
}

enum GcmKey {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM cipher producing `base64(nonce || ciphertext || tag)`
pub struct AesGcmCipher {
    key: GcmKey,
}

impl AesGcmCipher {
    /// Create a cipher from a raw 16- or 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CredentialError> {
        let key = match key.len() {
            16 => GcmKey::Aes128(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|e| CredentialError::InvalidKey(e.to_string()))?,
            ),
            32 => GcmKey::Aes256(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|e| CredentialError::InvalidKey(e.to_string()))?,
            ),
            n => {
                return Err(CredentialError::InvalidKey(format!(
                    "expected 16 or 32 bytes, got {}",
                    n
                )))
            }
        };
        Ok(Self { key })
    }

    /// Load the key from the `ENCRYPTION_KEY` environment variable
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_env_var(ENCRYPTION_KEY_VAR)
    }

    pub fn from_env_var(var_name: &str) -> Result<Self, CredentialError> {
        let key = env::var(var_name)
            .map_err(|_| CredentialError::MissingKey(var_name.to_string()))?;
        if key.is_empty() {
            return Err(CredentialError::MissingKey(var_name.to_string()));
        }
        Self::new(key.as_bytes())
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = match &self.key {
            GcmKey::Aes128(c) => c.encrypt(&nonce, plaintext.as_bytes()),
            GcmKey::Aes256(c) => c.encrypt(&nonce, plaintext.as_bytes()),
        }
        .map_err(|e| CredentialError::Encrypt(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(payload))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialError> {
        let data = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| CredentialError::Decode(e.to_string()))?;
        if data.len() < NONCE_SIZE {
            return Err(CredentialError::Decode("ciphertext too short".to_string()));
        }

        let (nonce, body) = data.split_at(NONCE_SIZE);
        let nonce = GenericArray::from_slice(nonce);
        let plain = match &self.key {
            GcmKey::Aes128(c) => c.decrypt(nonce, body),
            GcmKey::Aes256(c) => c.decrypt(nonce, body),
        }
        .map_err(|e| CredentialError::Decrypt(e.to_string()))?;

        String::from_utf8(plain).map_err(|e| CredentialError::Decrypt(e.to_string()))
    }
}
