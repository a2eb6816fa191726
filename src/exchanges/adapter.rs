use crate::error::{FetchError, StreamError};
use crate::models::{AccountId, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Upper bound on records requested from an exchange in a single call
pub const MAX_TRADES_PER_PAGE: usize = 1000;

/// Opaque credential for a live session (Binance listen key, OKX login frame)
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.0.len())
    }
}

/// Receives raw inbound session messages in arrival order
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: Value);
}

/// Pull-based trade history
#[async_trait]
pub trait TradeHistory: Send + Sync {
    /// Fetch one page of fills newer than `since`, oldest first.
    ///
    /// `None` means all history the exchange will return.
    async fn fetch_trades(
        &self,
        account_id: &AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError>;
}

/// Push-based private order stream
#[async_trait]
pub trait UserDataStream: Send + Sync {
    async fn authenticate(&self, api_key: &str, secret: &str) -> Result<SessionToken, StreamError>;

    async fn connect(&self, token: &SessionToken) -> Result<(), StreamError>;

    /// Deliver messages to `sink` until the connection drops or `close` is called.
    ///
    /// Returns `Ok(())` only after a `close`.
    async fn listen(&self, sink: &dyn EventSink) -> Result<(), StreamError>;

    async fn close(&self) -> Result<(), StreamError>;

    fn renewal_interval(&self) -> Duration;
}

/// One exchange client bound to a single (account, exchange, market)
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> &str;

    fn market(&self) -> &str;

    fn history(&self) -> Option<&dyn TradeHistory> {
        None
    }

    fn streaming(&self) -> Option<&dyn UserDataStream> {
        None
    }
}

/// Merge per-symbol pages into one ascending page.
///
/// A full page may have more records behind it, so everything newer than the
/// earliest full page's last record is held back for the next pull. This keeps
/// the cursor from skipping past records that were never fetched.
pub fn merge_pages(pages: Vec<Vec<Record>>, since: Option<DateTime<Utc>>, page_size: usize) -> Vec<Record> {
    let cutoff = pages
        .iter()
        .filter(|page| page.len() >= page_size)
        .filter_map(|page| page.iter().map(|r| r.time).max())
        .min();

    let mut records: Vec<Record> = pages
        .into_iter()
        .flatten()
        .filter(|r| since.map_or(true, |s| r.time > s))
        .filter(|r| cutoff.map_or(true, |c| r.time <= c))
        .collect();
    records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    records
}

/// First `limit` records of an ascending page.
///
/// Records sharing a timestamp with the first one cut are dropped too, since
/// the cursor is exclusive and would otherwise skip them. If a single
/// timestamp fills the whole page it is kept as is.
pub fn take_oldest(mut records: Vec<Record>, limit: usize) -> Vec<Record> {
    if records.len() <= limit {
        return records;
    }
    let boundary = records[limit].time;
    let keep = records[..limit].iter().take_while(|r| r.time < boundary).count();
    records.truncate(if keep == 0 { limit } else { keep });
    records
}


impl std::fmt::Debug for dyn ExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAdapter")
            .field("exchange", &self.exchange())
            .field("market", &self.market())
            .finish()
    }
}
