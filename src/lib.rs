pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod logging;
pub mod models;
pub mod parsers;
pub mod security;
pub mod store;
pub mod streaming;
pub mod sync;

pub use cache::{client_key, ClientCache, ClientSet};
pub use cancel::CancellationSignal;
pub use config::{ConfigError, SyncConfig};
pub use error::{CredentialError, FetchError, StoreError, StreamError, SyncError};
pub use exchanges::{
    AdapterConfig, AdapterRegistry, EventSink, ExchangeAdapter, SessionToken, TradeHistory,
    UserDataStream,
};
pub use logging::init_logging;
pub use models::{Account, AccountId, Credentials, Record, RecordKey};
pub use parsers::{ParseContext, ParsedEvent, ParserRegistry};
pub use security::{AesGcmCipher, CredentialCipher, SecretString};
pub use store::{AccountStore, FileStore, MemoryStore, RecordStore, UpsertSummary};
pub use streaming::{ReconnectPolicy, StreamOrchestrator};
pub use sync::{SyncPhase, SyncReport, TradeSyncService};
