use std::fmt;

/// Credential encryption/decryption errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Encryption key environment variable is not set
    MissingKey(String),
    /// Encryption key has an unsupported length
    InvalidKey(String),
    /// Ciphertext is not valid base64 or is truncated
    Decode(String),
    /// Authenticated decryption failed
    Decrypt(String),
    /// Encryption failed
    Encrypt(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::MissingKey(var) => {
                write!(f, "encryption key environment variable '{}' is not set", var)
            }
            CredentialError::InvalidKey(msg) => write!(f, "invalid encryption key: {}", msg),
            CredentialError::Decode(msg) => write!(f, "malformed ciphertext: {}", msg),
            CredentialError::Decrypt(msg) => write!(f, "decryption failed: {}", msg),
            CredentialError::Encrypt(msg) => write!(f, "encryption failed: {}", msg),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors raised while pulling trade history from an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    NetworkError(String),
    ApiError(String),
    AuthenticationError(String),
    RateLimitError(String),
    ParseError(String),
    /// The caller cancelled the fetch before it completed
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            FetchError::ApiError(msg) => write!(f, "API error: {}", msg),
            FetchError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            FetchError::RateLimitError(msg) => write!(f, "Rate limit error: {}", msg),
            FetchError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            FetchError::Cancelled => write!(f, "Fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Errors raised by live user-data sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    ConnectionError(String),
    AuthenticationError(String),
    ProtocolError(String),
    /// The remote side closed the socket
    Disconnected(String),
    /// `listen` was called before `connect`
    NotConnected,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            StreamError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            StreamError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            StreamError::Disconnected(msg) => write!(f, "Disconnected: {}", msg),
            StreamError::NotConnected => write!(f, "Session is not connected"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Record/account store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Serialization(String),
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "Store I/O error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Store serialization error: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Top-level error taxonomy of the synchronization core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Unknown exchange/market pair; fatal to that client only
    Configuration(String),
    /// Credential decrypt/encrypt failure; fatal to that account's operation
    Credential(CredentialError),
    /// Historical pull failure; retried on the next scheduled cycle
    Fetch(FetchError),
    /// Live session failure; triggers reconnect
    Stream(StreamError),
    /// Persistence failure
    Store(StoreError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::Credential(e) => write!(f, "Credential error: {}", e),
            SyncError::Fetch(e) => write!(f, "Fetch error: {}", e),
            SyncError::Stream(e) => write!(f, "Stream error: {}", e),
            SyncError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Configuration(_) => None,
            SyncError::Credential(e) => Some(e),
            SyncError::Fetch(e) => Some(e),
            SyncError::Stream(e) => Some(e),
            SyncError::Store(e) => Some(e),
        }
    }
}

impl From<CredentialError> for SyncError {
    fn from(error: CredentialError) -> Self {
        SyncError::Credential(error)
    }
}

impl From<FetchError> for SyncError {
    fn from(error: FetchError) -> Self {
        SyncError::Fetch(error)
    }
}

impl From<StreamError> for SyncError {
    fn from(error: StreamError) -> Self {
        SyncError::Stream(error)
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        SyncError::Store(error)
    }
}
