use crate::error::SyncError;
use crate::exchanges::adapter::ExchangeAdapter;
use crate::exchanges::binance::{BinanceAdapter, BinanceMarket};
use crate::exchanges::okx::{OkxAdapter, OkxMarket};
use crate::models::{Credentials, ExchangeId, MarketId, BINANCE, FUTURES, OKX, SPOT};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything an adapter needs from an account, credentials already decrypted
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub credentials: Credentials,
    pub sandbox: bool,
    pub symbols: Vec<String>,
}

pub type AdapterFactory = Arc<dyn Fn(AdapterConfig) -> Arc<dyn ExchangeAdapter> + Send + Sync>;

/// Static (exchange, market) to adapter constructor table
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<(ExchangeId, MarketId), AdapterFactory>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("AdapterRegistry").field("pairs", &keys).finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binance spot/futures and OKX spot/swap
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BINANCE, SPOT, |config| {
            Arc::new(BinanceAdapter::from_config(BinanceMarket::Spot, config))
        });
        registry.register(BINANCE, FUTURES, |config| {
            Arc::new(BinanceAdapter::from_config(BinanceMarket::Futures, config))
        });
        registry.register(OKX, SPOT, |config| {
            Arc::new(OkxAdapter::from_config(OkxMarket::Spot, config))
        });
        registry.register(OKX, FUTURES, |config| {
            Arc::new(OkxAdapter::from_config(OkxMarket::Swap, config))
        });
        registry
    }

    pub fn register<F>(&mut self, exchange: &str, market: &str, factory: F)
    where
        F: Fn(AdapterConfig) -> Arc<dyn ExchangeAdapter> + Send + Sync + 'static,
    {
        self.factories
            .insert((exchange.to_string(), market.to_string()), Arc::new(factory));
    }

    pub fn supports(&self, exchange: &str, market: &str) -> bool {
        self.factories
            .contains_key(&(exchange.to_string(), market.to_string()))
    }

    pub fn create(
        &self,
        exchange: &str,
        market: &str,
        config: AdapterConfig,
    ) -> Result<Arc<dyn ExchangeAdapter>, SyncError> {
        match self.factories.get(&(exchange.to_string(), market.to_string())) {
            Some(factory) => Ok(factory(config)),
            None if self.factories.keys().any(|(e, _)| e == exchange) => Err(
                SyncError::Configuration(format!(
                    "unsupported market: {} for exchange: {}",
                    market, exchange
                )),
            ),
            None => Err(SyncError::Configuration(format!(
                "unsupported exchange: {}",
                exchange
            ))),
        }
    }
}
