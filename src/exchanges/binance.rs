use crate::error::{FetchError, StreamError};
use crate::exchanges::adapter::{
    merge_pages, EventSink, ExchangeAdapter, SessionToken, TradeHistory, UserDataStream,
    MAX_TRADES_PER_PAGE,
};
use crate::exchanges::registry::AdapterConfig;
use crate::exchanges::session::WsSession;
use crate::models::{AccountId, Credentials, Record, BINANCE, FUTURES, SPOT};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const RECV_WINDOW_MS: u64 = 5000;
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

/// Binance product line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    Spot,
    /// USDⓈ-M futures
    Futures,
}

impl BinanceMarket {
    pub fn market_id(&self) -> &'static str {
        match self {
            BinanceMarket::Spot => SPOT,
            BinanceMarket::Futures => FUTURES,
        }
    }

    fn trades_path(&self) -> &'static str {
        match self {
            BinanceMarket::Spot => "/api/v3/myTrades",
            BinanceMarket::Futures => "/fapi/v1/userTrades",
        }
    }

    fn listen_key_path(&self) -> &'static str {
        match self {
            BinanceMarket::Spot => "/api/v3/userDataStream",
            BinanceMarket::Futures => "/fapi/v1/listenKey",
        }
    }
}

/// REST and websocket base URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceEndpoints {
    pub rest_url: String,
    pub ws_url: String,
}

impl BinanceEndpoints {
    pub fn for_market(market: BinanceMarket, testnet: bool) -> Self {
        let (rest_url, ws_url) = match (market, testnet) {
            (BinanceMarket::Spot, false) => {
                ("https://api.binance.com", "wss://stream.binance.com:9443/ws")
            }
            (BinanceMarket::Spot, true) => (
                "https://testnet.binance.vision",
                "wss://stream.testnet.binance.vision/ws",
            ),
            (BinanceMarket::Futures, false) => {
                ("https://fapi.binance.com", "wss://fstream.binance.com/ws")
            }
            (BinanceMarket::Futures, true) => (
                "https://testnet.binancefuture.com",
                "wss://stream.binancefuture.com/ws",
            ),
        };
        Self {
            rest_url: rest_url.to_string(),
            ws_url: ws_url.to_string(),
        }
    }
}

/// Binance error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinanceError {
    NetworkError(String),
    ApiError(String),
    ParseError(String),
    AuthenticationError(String),
    RateLimitError(String),
}

impl std::fmt::Display for BinanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinanceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            BinanceError::ApiError(msg) => write!(f, "API error: {}", msg),
            BinanceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            BinanceError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            BinanceError::RateLimitError(msg) => write!(f, "Rate limit error: {}", msg),
        }
    }
}

impl std::error::Error for BinanceError {}

impl From<BinanceError> for FetchError {
    fn from(error: BinanceError) -> Self {
        match error {
            BinanceError::NetworkError(msg) => FetchError::NetworkError(msg),
            BinanceError::ApiError(msg) => FetchError::ApiError(msg),
            BinanceError::ParseError(msg) => FetchError::ParseError(msg),
            BinanceError::AuthenticationError(msg) => FetchError::AuthenticationError(msg),
            BinanceError::RateLimitError(msg) => FetchError::RateLimitError(msg),
        }
    }
}

impl From<BinanceError> for StreamError {
    fn from(error: BinanceError) -> Self {
        match error {
            BinanceError::AuthenticationError(msg) => StreamError::AuthenticationError(msg),
            BinanceError::ParseError(msg) => StreamError::ProtocolError(msg),
            other => StreamError::ConnectionError(other.to_string()),
        }
    }
}

/// Where a `myTrades`/`userTrades` page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradesFrom {
    /// Trade id, inclusive. Pages walk forward from the oldest fill.
    Id(u64),
    /// Milliseconds, inclusive
    Time(i64),
}

/// A fill as returned by `myTrades` (spot) or `userTrades` (futures)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceTrade {
    pub symbol: String,
    pub id: u64,
    pub order_id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    #[serde(default)]
    pub quote_qty: Option<Decimal>,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: i64,
    #[serde(default)]
    pub is_buyer: Option<bool>,
    #[serde(default)]
    pub is_maker: Option<bool>,
    #[serde(default)]
    pub buyer: Option<bool>,
    #[serde(default)]
    pub maker: Option<bool>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub position_side: Option<String>,
}

impl BinanceTrade {
    pub fn into_record(self, account_id: AccountId, market: &str) -> Result<Record, BinanceError> {
        let time = Utc
            .timestamp_millis_opt(self.time)
            .single()
            .ok_or_else(|| BinanceError::ParseError(format!("invalid trade time {}", self.time)))?;

        let side = match self.side {
            Some(side) => side,
            None => match self.is_buyer.or(self.buyer) {
                Some(true) => "BUY".to_string(),
                Some(false) => "SELL".to_string(),
                None => String::new(),
            },
        };

        let mut record = Record::new(self.id.to_string(), account_id, BINANCE, market, time);
        record.symbol = self.symbol;
        record.side = side;
        record.order_type = "TRADE".to_string();
        record.status = "FILLED".to_string();
        record.price = self.price;
        record.quantity = self.qty;
        record.executed_quantity = self.qty;
        record.avg_price = self.price;
        record.commission = self.commission;
        record.commission_asset = self.commission_asset;
        record.order_id = Some(self.order_id.to_string());
        record.quote_quantity = self.quote_qty;
        record.position_side = self.position_side;
        record.is_maker = self.is_maker.or(self.maker);
        Ok(record)
    }
}

/// Signed REST client for one credential set
#[derive(Clone)]
pub struct BinanceClient {
    credentials: Credentials,
    market: BinanceMarket,
    rest_url: String,
    http_client: Client,
}

impl BinanceClient {
    pub fn new(credentials: Credentials, market: BinanceMarket, rest_url: impl Into<String>) -> Self {
        Self {
            credentials,
            market,
            rest_url: rest_url.into(),
            http_client: Client::new(),
        }
    }

    /// Same endpoints and connection pool, different credentials
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            credentials,
            ..self.clone()
        }
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(&self, query_string: &str) -> Result<String, BinanceError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.credentials.secret.expose().as_bytes())
            .map_err(|e| BinanceError::AuthenticationError(e.to_string()))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<String, BinanceError> {
        let response = request
            .header("X-MBX-APIKEY", self.credentials.api_key.expose())
            .send()
            .await
            .map_err(|e| BinanceError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BinanceError::NetworkError(e.to_string()))?;
        if status.is_success() {
            return Ok(body);
        }

        let message = format!("{}: {} - {}", what, status, body);
        let code = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("code").and_then(Value::as_i64));
        Err(match (status.as_u16(), code) {
            (401 | 403, _) | (_, Some(-2014 | -2015 | -1022)) => {
                BinanceError::AuthenticationError(message)
            }
            (418 | 429, _) => BinanceError::RateLimitError(message),
            _ => BinanceError::ApiError(message),
        })
    }

    /// One page of the account's fills for `symbol`, oldest first from `from`.
    ///
    /// Without either bound Binance answers with the most recent fills, so
    /// every request carries one.
    pub async fn my_trades(
        &self,
        symbol: &str,
        from: TradesFrom,
        limit: usize,
    ) -> Result<Vec<BinanceTrade>, BinanceError> {
        let mut query = format!("symbol={}&limit={}", symbol, limit);
        match from {
            TradesFrom::Id(id) => query.push_str(&format!("&fromId={}", id)),
            TradesFrom::Time(start) => query.push_str(&format!("&startTime={}", start)),
        }
        query.push_str(&format!(
            "&recvWindow={}&timestamp={}",
            RECV_WINDOW_MS,
            Utc::now().timestamp_millis()
        ));
        let signature = self.sign(&query)?;

        let url = format!(
            "{}{}?{}&signature={}",
            self.rest_url,
            self.market.trades_path(),
            query,
            signature
        );
        let body = self
            .execute(self.http_client.get(&url), "Failed to get trades")
            .await?;
        serde_json::from_str(&body).map_err(|e| BinanceError::ParseError(e.to_string()))
    }

    /// Create (or extend) the user data stream and return its listen key
    pub async fn start_user_stream(&self) -> Result<String, BinanceError> {
        let url = format!("{}{}", self.rest_url, self.market.listen_key_path());
        let body = self
            .execute(self.http_client.post(&url), "Failed to create listen key")
            .await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| BinanceError::ParseError(e.to_string()))?;
        json.get("listenKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BinanceError::ParseError("Invalid listen key response".to_string()))
    }

    pub async fn keepalive_user_stream(&self, listen_key: &str) -> Result<(), BinanceError> {
        let url = format!(
            "{}{}?listenKey={}",
            self.rest_url,
            self.market.listen_key_path(),
            listen_key
        );
        self.execute(self.http_client.put(&url), "Failed to keep listen key alive")
            .await
            .map(|_| ())
    }
}

/// Binance spot or futures client bound to one account
pub struct BinanceAdapter {
    market: BinanceMarket,
    endpoints: BinanceEndpoints,
    symbols: Vec<String>,
    client: BinanceClient,
    session: WsSession,
    session_client: RwLock<Option<Arc<BinanceClient>>>,
    keepalive: Duration,
}

impl BinanceAdapter {
    pub fn new(market: BinanceMarket, config: AdapterConfig, endpoints: BinanceEndpoints) -> Self {
        let client = BinanceClient::new(config.credentials, market, endpoints.rest_url.clone());
        Self {
            market,
            endpoints,
            symbols: config.symbols,
            client,
            session: WsSession::new(),
            session_client: RwLock::new(None),
            keepalive: LISTEN_KEY_KEEPALIVE,
        }
    }

    /// Listen key keepalive period, 30 minutes by default
    pub fn with_keepalive(mut self, period: Duration) -> Self {
        self.keepalive = period;
        self
    }

    /// Adapter for the live or testnet endpoints of `market`
    pub fn from_config(market: BinanceMarket, config: AdapterConfig) -> Self {
        let endpoints = BinanceEndpoints::for_market(market, config.sandbox);
        Self::new(market, config, endpoints)
    }

    pub fn endpoints(&self) -> &BinanceEndpoints {
        &self.endpoints
    }

    async fn open_socket(&self, listen_key: &str) -> Result<(), StreamError> {
        let url = format!("{}/{}", self.endpoints.ws_url, listen_key);
        self.session.open(&url).await
    }

    /// Renew `listen_key` until close, replacing the task for any earlier key
    async fn keep_alive(&self, client: Arc<BinanceClient>, listen_key: String) {
        self.session
            .spawn_renewal(self.renewal_interval(), move || {
                let client = client.clone();
                let listen_key = listen_key.clone();
                async move {
                    client
                        .keepalive_user_stream(&listen_key)
                        .await
                        .map_err(StreamError::from)
                }
            })
            .await;
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> &str {
        BINANCE
    }

    fn market(&self) -> &str {
        self.market.market_id()
    }

    fn history(&self) -> Option<&dyn TradeHistory> {
        Some(self)
    }

    fn streaming(&self) -> Option<&dyn UserDataStream> {
        Some(self)
    }
}

#[async_trait]
impl TradeHistory for BinanceAdapter {
    async fn fetch_trades(
        &self,
        account_id: &AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError> {
        if self.symbols.is_empty() {
            warn!(
                "Binance {} account {} has no symbols configured, nothing to fetch",
                self.market(),
                account_id
            );
            return Ok(Vec::new());
        }

        // startTime is inclusive on Binance, the cursor is exclusive. A first
        // sync walks from the oldest trade id.
        let from = since.map_or(TradesFrom::Id(0), |t| TradesFrom::Time(t.timestamp_millis() + 1));
        let mut pages = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let trades = self
                .client
                .my_trades(symbol, from, MAX_TRADES_PER_PAGE)
                .await?;
            debug!("Fetched {} {} trades for {}", trades.len(), symbol, account_id);

            let records = trades
                .into_iter()
                .map(|t| t.into_record(*account_id, self.market()))
                .collect::<Result<Vec<_>, _>>()?;
            pages.push(records);
        }

        Ok(merge_pages(pages, since, MAX_TRADES_PER_PAGE))
    }
}

#[async_trait]
impl UserDataStream for BinanceAdapter {
    async fn authenticate(&self, api_key: &str, secret: &str) -> Result<SessionToken, StreamError> {
        self.session.reset();
        let client = Arc::new(self.client.with_credentials(Credentials::new(api_key, secret)));
        let listen_key = client.start_user_stream().await?;
        *self.session_client.write().await = Some(client);
        Ok(SessionToken::new(listen_key))
    }

    async fn connect(&self, token: &SessionToken) -> Result<(), StreamError> {
        let client = self
            .session_client
            .read()
            .await
            .clone()
            .ok_or_else(|| StreamError::AuthenticationError("not authenticated".to_string()))?;

        self.open_socket(token.as_str()).await?;
        info!("Binance {} user data stream connected", self.market());
        self.keep_alive(client, token.as_str().to_string()).await;
        Ok(())
    }

    async fn listen(&self, sink: &dyn EventSink) -> Result<(), StreamError> {
        if self.session.is_stopped() {
            return Ok(());
        }

        if !self.session.is_open().await {
            // Reconnect: POST returns the live key or issues a new one
            let client = self
                .session_client
                .read()
                .await
                .clone()
                .ok_or(StreamError::NotConnected)?;
            let listen_key = client.start_user_stream().await?;
            self.open_socket(&listen_key).await?;
            info!("Binance {} user data stream reconnected", self.market());
            self.keep_alive(client, listen_key).await;
        }

        self.session
            .pump(sink, |event| {
                match event.get("e").and_then(Value::as_str) {
                    Some("listenKeyExpired") => {
                        Some(StreamError::Disconnected("listen key expired".to_string()))
                    }
                    _ => None,
                }
            })
            .await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.session.close().await;
        debug!("Binance {} user data stream closed", self.market());
        Ok(())
    }

    fn renewal_interval(&self) -> Duration {
        self.keepalive
    }
}
