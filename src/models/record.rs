use crate::models::{AccountId, ExchangeId, MarketId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Natural key of a record: (exchange-native id, account, exchange, market)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub id: String,
    pub account_id: AccountId,
    pub exchange: ExchangeId,
    pub market: MarketId,
}

/// Canonical fill / order-state record stored in the `orders` collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Exchange-native id (trade id for fills, order id for order updates)
    pub id: String,
    pub account_id: AccountId,
    pub exchange: ExchangeId,
    pub market: MarketId,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub avg_price: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: DateTime<Utc>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_maker: Option<bool>,
}

impl Record {
    /// Create an otherwise empty record for the given owner
    pub fn new(
        id: impl Into<String>,
        account_id: AccountId,
        exchange: impl Into<ExchangeId>,
        market: impl Into<MarketId>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id,
            exchange: exchange.into(),
            market: market.into(),
            symbol: String::new(),
            side: String::new(),
            order_type: String::new(),
            price: Decimal::ZERO,
            quantity: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            commission: Decimal::ZERO,
            commission_asset: String::new(),
            time,
            status: String::new(),
            order_id: None,
            quote_quantity: None,
            position_side: None,
            is_maker: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            id: self.id.clone(),
            account_id: self.account_id,
            exchange: self.exchange.clone(),
            market: self.market.clone(),
        }
    }

    /// Records without an exchange id are never persisted
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}
