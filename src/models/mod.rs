pub mod account;
pub mod record;

pub use account::{Account, AccountId, Credentials};
pub use record::{Record, RecordKey};

/// Exchange identifier, e.g. "binance"
pub type ExchangeId = String;

/// Market identifier within an exchange, e.g. "spot" or "futures"
pub type MarketId = String;

pub const BINANCE: &str = "binance";
pub const OKX: &str = "okx";
pub const SPOT: &str = "spot";
pub const FUTURES: &str = "futures";
