pub mod adapter;
pub mod binance;
pub mod okx;
pub mod registry;
pub mod session;

pub use adapter::{
    EventSink, ExchangeAdapter, SessionToken, TradeHistory, UserDataStream, MAX_TRADES_PER_PAGE,
};
pub use binance::{BinanceAdapter, BinanceEndpoints, BinanceMarket, TradesFrom};
pub use okx::{OkxAdapter, OkxEndpoints, OkxMarket};
pub use registry::{AdapterConfig, AdapterFactory, AdapterRegistry};
