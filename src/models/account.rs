use crate::error::CredentialError;
use crate::models::{ExchangeId, MarketId};
use crate::security::{CredentialCipher, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one registered exchange credential set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A registered account, as stored in the `accounts` collection.
///
/// Credentials are kept encrypted; nothing in this crate mutates an account
/// after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    #[serde(default)]
    pub label: String,
    pub exchange: ExchangeId,
    pub market: MarketId,
    pub encrypted_api_key: String,
    pub encrypted_secret: String,
    /// OKX requires a passphrase alongside key and secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_passphrase: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    /// Symbols whose trade history is pulled (Binance trade endpoints are per symbol)
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Markets with a live session; empty means only `market`
    #[serde(default)]
    pub stream_markets: Vec<MarketId>,
}

impl Account {
    /// Register a new account, encrypting the plaintext credentials
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        cipher: &dyn CredentialCipher,
        label: impl Into<String>,
        exchange: impl Into<ExchangeId>,
        market: impl Into<MarketId>,
        api_key: &str,
        secret: &str,
        passphrase: Option<&str>,
        sandbox: bool,
    ) -> Result<Self, CredentialError> {
        let encrypted_passphrase = match passphrase {
            Some(p) => Some(cipher.encrypt(p)?),
            None => None,
        };

        Ok(Self {
            id: AccountId::new(),
            label: label.into(),
            exchange: exchange.into(),
            market: market.into(),
            encrypted_api_key: cipher.encrypt(api_key)?,
            encrypted_secret: cipher.encrypt(secret)?,
            encrypted_passphrase,
            sandbox,
            symbols: Vec::new(),
            stream_markets: Vec::new(),
        })
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream_markets<I, S>(mut self, markets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MarketId>,
    {
        self.stream_markets = markets.into_iter().map(Into::into).collect();
        self
    }

    /// Markets that get a live session
    pub fn streaming_markets(&self) -> Vec<MarketId> {
        if self.stream_markets.is_empty() {
            vec![self.market.clone()]
        } else {
            self.stream_markets.clone()
        }
    }

    /// Decrypt the stored credentials
    pub fn decrypt_credentials(
        &self,
        cipher: &dyn CredentialCipher,
    ) -> Result<Credentials, CredentialError> {
        let passphrase = match &self.encrypted_passphrase {
            Some(p) => Some(SecretString::new(cipher.decrypt(p)?)),
            None => None,
        };

        Ok(Credentials {
            api_key: SecretString::new(cipher.decrypt(&self.encrypted_api_key)?),
            secret: SecretString::new(cipher.decrypt(&self.encrypted_secret)?),
            passphrase,
        })
    }
}

/// Decrypted credentials handed to adapters
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub secret: SecretString,
    pub passphrase: Option<SecretString>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            secret: SecretString::new(secret.into()),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::new(passphrase.into()));
        self
    }
}
