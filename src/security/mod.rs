/// Credential handling: masked secrets and encryption at rest
pub mod cipher;
pub mod secrets;

pub use cipher::{AesGcmCipher, CredentialCipher, ENCRYPTION_KEY_VAR};
pub use secrets::SecretString;
