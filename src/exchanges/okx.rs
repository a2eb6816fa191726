use crate::error::{FetchError, StreamError};
use crate::exchanges::adapter::{
    merge_pages, take_oldest, EventSink, ExchangeAdapter, SessionToken, TradeHistory,
    UserDataStream, MAX_TRADES_PER_PAGE,
};
use crate::exchanges::registry::AdapterConfig;
use crate::exchanges::session::WsSession;
use crate::models::{AccountId, Credentials, Record, FUTURES, OKX, SPOT};
use crate::security::SecretString;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::RwLock;

/// fills-history caps `limit` at 100
const FILLS_PAGE_LIMIT: usize = 100;
const PING_INTERVAL: Duration = Duration::from_secs(20);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const FILLS_HISTORY_PATH: &str = "/api/v5/trade/fills-history";

/// OKX product line; futures map to perpetual swaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OkxMarket {
    Spot,
    Swap,
}

impl OkxMarket {
    pub fn market_id(&self) -> &'static str {
        match self {
            OkxMarket::Spot => SPOT,
            OkxMarket::Swap => FUTURES,
        }
    }

    pub fn inst_type(&self) -> &'static str {
        match self {
            OkxMarket::Spot => "SPOT",
            OkxMarket::Swap => "SWAP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkxEndpoints {
    pub rest_url: String,
    pub ws_url: String,
    /// Demo trading flag sent as `x-simulated-trading`
    pub simulated: bool,
}

impl OkxEndpoints {
    pub fn new(sandbox: bool) -> Self {
        let ws_url = if sandbox {
            "wss://wspap.okx.com:8443/ws/v5/private"
        } else {
            "wss://ws.okx.com:8443/ws/v5/private"
        };
        Self {
            rest_url: "https://www.okx.com".to_string(),
            ws_url: ws_url.to_string(),
            simulated: sandbox,
        }
    }
}

/// OKX error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OkxError {
    NetworkError(String),
    ApiError(String),
    ParseError(String),
    AuthenticationError(String),
    RateLimitError(String),
}

impl std::fmt::Display for OkxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OkxError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            OkxError::ApiError(msg) => write!(f, "API error: {}", msg),
            OkxError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            OkxError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            OkxError::RateLimitError(msg) => write!(f, "Rate limit error: {}", msg),
        }
    }
}

impl std::error::Error for OkxError {}

impl From<OkxError> for FetchError {
    fn from(error: OkxError) -> Self {
        match error {
            OkxError::NetworkError(msg) => FetchError::NetworkError(msg),
            OkxError::ApiError(msg) => FetchError::ApiError(msg),
            OkxError::ParseError(msg) => FetchError::ParseError(msg),
            OkxError::AuthenticationError(msg) => FetchError::AuthenticationError(msg),
            OkxError::RateLimitError(msg) => FetchError::RateLimitError(msg),
        }
    }
}

impl From<OkxError> for StreamError {
    fn from(error: OkxError) -> Self {
        match error {
            OkxError::AuthenticationError(msg) => StreamError::AuthenticationError(msg),
            other => StreamError::ConnectionError(other.to_string()),
        }
    }
}

/// base64(HMAC-SHA256(secret, timestamp + method + path + body))
fn sign(secret: &str, timestamp: &str, method: &str, request_path: &str, body: &str) -> Result<String, OkxError> {
    let message = format!("{}{}{}{}", timestamp, method, request_path, body);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| OkxError::AuthenticationError(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn classify(code: &str, message: String) -> OkxError {
    match code {
        "50011" | "50061" => OkxError::RateLimitError(message),
        c if c.starts_with("501") => OkxError::AuthenticationError(message),
        _ => OkxError::ApiError(message),
    }
}

/// One row of `/api/v5/trade/fills-history`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxFill {
    pub inst_id: String,
    pub trade_id: String,
    pub ord_id: String,
    /// Pagination key, `after` returns fills older than it
    pub bill_id: String,
    pub fill_px: Decimal,
    pub fill_sz: Decimal,
    pub side: String,
    #[serde(default)]
    pub pos_side: Option<String>,
    #[serde(default)]
    pub exec_type: Option<String>,
    #[serde(default)]
    pub fee_ccy: String,
    #[serde(default)]
    pub fee: Decimal,
    pub ts: String,
}

impl OkxFill {
    pub fn into_record(self, account_id: AccountId, market: &str) -> Result<Record, OkxError> {
        let time = self
            .ts
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| OkxError::ParseError(format!("invalid fill time {}", self.ts)))?;

        let mut record = Record::new(self.trade_id, account_id, OKX, market, time);
        record.symbol = self.inst_id;
        record.side = self.side;
        record.order_type = "TRADE".to_string();
        record.status = "FILLED".to_string();
        record.price = self.fill_px;
        record.quantity = self.fill_sz;
        record.executed_quantity = self.fill_sz;
        record.avg_price = self.fill_px;
        record.quote_quantity = Some(self.fill_px * self.fill_sz);
        record.commission = self.fee;
        record.commission_asset = self.fee_ccy;
        record.order_id = Some(self.ord_id);
        record.position_side = self.pos_side.filter(|p| !p.is_empty());
        record.is_maker = self.exec_type.map(|t| t == "M");
        Ok(record)
    }
}

/// Signed REST client
pub struct OkxClient {
    credentials: Credentials,
    endpoints: OkxEndpoints,
    http_client: Client,
}

impl OkxClient {
    pub fn new(credentials: Credentials, endpoints: OkxEndpoints) -> Self {
        Self {
            credentials,
            endpoints,
            http_client: Client::new(),
        }
    }

    /// One page of fills newer than `begin` (ms) and older than bill `after`,
    /// newest first as OKX returns them
    pub async fn fills_history(
        &self,
        inst_type: &str,
        begin: Option<i64>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OkxFill>, OkxError> {
        let passphrase = self
            .credentials
            .passphrase
            .as_ref()
            .ok_or_else(|| OkxError::AuthenticationError("missing passphrase".to_string()))?;

        let mut request_path = format!("{}?instType={}&limit={}", FILLS_HISTORY_PATH, inst_type, limit);
        if let Some(begin) = begin {
            request_path.push_str(&format!("&begin={}", begin));
        }
        if let Some(after) = after {
            request_path.push_str(&format!("&after={}", after));
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let signature = sign(
            self.credentials.secret.expose(),
            &timestamp,
            "GET",
            &request_path,
            "",
        )?;

        let url = format!("{}{}", self.endpoints.rest_url, request_path);
        let mut request = self
            .http_client
            .get(&url)
            .header("OK-ACCESS-KEY", self.credentials.api_key.expose())
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", passphrase.expose());
        if self.endpoints.simulated {
            request = request.header("x-simulated-trading", "1");
        }

        let response = request
            .send()
            .await
            .map_err(|e| OkxError::NetworkError(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OkxError::NetworkError(e.to_string()))?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| OkxError::ParseError(e.to_string()))?;

        let code = json.get("code").and_then(Value::as_str).unwrap_or_default();
        if !status.is_success() || code != "0" {
            let message = format!("Failed to get fills: {} - {}", status, body);
            if status.as_u16() == 429 {
                return Err(OkxError::RateLimitError(message));
            }
            if status.as_u16() == 401 {
                return Err(OkxError::AuthenticationError(message));
            }
            return Err(classify(code, message));
        }

        let data = json.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(data).map_err(|e| OkxError::ParseError(e.to_string()))
    }
}

/// OKX spot or swap client bound to one account
pub struct OkxAdapter {
    market: OkxMarket,
    endpoints: OkxEndpoints,
    client: OkxClient,
    passphrase: Option<SecretString>,
    session: WsSession,
    session_credentials: RwLock<Option<(SecretString, SecretString)>>,
}

impl OkxAdapter {
    pub fn new(market: OkxMarket, config: AdapterConfig, endpoints: OkxEndpoints) -> Self {
        let passphrase = config.credentials.passphrase.clone();
        Self {
            market,
            client: OkxClient::new(config.credentials, endpoints.clone()),
            endpoints,
            passphrase,
            session: WsSession::new(),
            session_credentials: RwLock::new(None),
        }
    }

    pub fn from_config(market: OkxMarket, config: AdapterConfig) -> Self {
        let endpoints = OkxEndpoints::new(config.sandbox);
        Self::new(market, config, endpoints)
    }

    /// Build the `login` frame for the private channel
    fn login_frame(&self, api_key: &str, secret: &str) -> Result<SessionToken, StreamError> {
        let passphrase = self.passphrase.as_ref().map(SecretString::expose).ok_or_else(|| {
            StreamError::AuthenticationError("OKX sessions require a passphrase".to_string())
        })?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(secret, &timestamp, "GET", "/users/self/verify", "")?;
        let frame = json!({
            "op": "login",
            "args": [{
                "apiKey": api_key,
                "passphrase": passphrase,
                "timestamp": timestamp,
                "sign": signature,
            }]
        });
        Ok(SessionToken::new(frame.to_string()))
    }

    async fn login_and_subscribe(&self, token: &SessionToken) -> Result<(), StreamError> {
        self.session.open(&self.endpoints.ws_url).await?;
        self.session.send_text(token.as_str()).await?;

        let reply = self.session.recv_json(LOGIN_TIMEOUT).await?;
        let event = reply.get("event").and_then(Value::as_str);
        let code = reply.get("code").and_then(Value::as_str);
        if event != Some("login") || code != Some("0") {
            return Err(StreamError::AuthenticationError(format!("login rejected: {}", reply)));
        }

        let subscribe = json!({
            "op": "subscribe",
            "args": [{"channel": "orders", "instType": self.market.inst_type()}]
        });
        self.session.send_text(subscribe.to_string()).await
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> &str {
        OKX
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
impl TradeHistory for OkxAdapter {
    async fn fetch_trades(
        &self,
        account_id: &AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError> {
        let begin = since.map(|t| t.timestamp_millis());
        let since_ms = begin.unwrap_or(i64::MIN);

        // Pages come newest first, so walk back to the cursor before anything
        // is returned. Stopping early would let the cursor pass older fills.
        let mut fills: Vec<OkxFill> = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .client
                .fills_history(self.market.inst_type(), begin, after.as_deref(), FILLS_PAGE_LIMIT)
                .await?;
            let full = page.len() >= FILLS_PAGE_LIMIT;
            let oldest = page.last().map(|f| (f.bill_id.clone(), f.ts.parse::<i64>().unwrap_or(i64::MIN)));
            fills.extend(page);

            match oldest {
                Some((bill_id, ts)) if full && ts > since_ms && after.as_deref() != Some(bill_id.as_str()) => {
                    debug!("OKX {} page full for {}, paging before bill {}", self.market(), account_id, bill_id);
                    after = Some(bill_id);
                }
                _ => break,
            }
        }

        let records = fills
            .into_iter()
            .map(|f| f.into_record(*account_id, self.market()))
            .collect::<Result<Vec<_>, _>>()?;
        let records = merge_pages(vec![records], since, usize::MAX);
        if records.len() > MAX_TRADES_PER_PAGE {
            warn!(
                "OKX {} has {} new fills for {}, keeping the oldest {} for this pass",
                self.market(),
                records.len(),
                account_id,
                MAX_TRADES_PER_PAGE
            );
        }
        Ok(take_oldest(records, MAX_TRADES_PER_PAGE))
    }
}

#[async_trait]
impl UserDataStream for OkxAdapter {
    async fn authenticate(&self, api_key: &str, secret: &str) -> Result<SessionToken, StreamError> {
        self.session.reset();
        let token = self.login_frame(api_key, secret)?;
        *self.session_credentials.write().await = Some((
            SecretString::new(api_key.to_string()),
            SecretString::new(secret.to_string()),
        ));
        Ok(token)
    }

    async fn connect(&self, token: &SessionToken) -> Result<(), StreamError> {
        self.login_and_subscribe(token).await?;
        info!("OKX {} private channel connected", self.market());

        let sender = self.session.sender();
        self.session
            .spawn_renewal(self.renewal_interval(), move || {
                let sender = sender.clone();
                async move { sender.send_text("ping").await }
            })
            .await;
        Ok(())
    }

    async fn listen(&self, sink: &dyn EventSink) -> Result<(), StreamError> {
        if self.session.is_stopped() {
            return Ok(());
        }

        if !self.session.is_open().await {
            // Login timestamps expire, so reconnects sign a fresh frame
            let (api_key, secret) = self
                .session_credentials
                .read()
                .await
                .clone()
                .ok_or(StreamError::NotConnected)?;
            let token = self.login_frame(api_key.expose(), secret.expose())?;
            self.connect(&token).await?;
        }

        self.session
            .pump(sink, |event| match event.get("event").and_then(Value::as_str) {
                Some("error") => Some(StreamError::ProtocolError(event.to_string())),
                Some("notice") => Some(StreamError::Disconnected(event.to_string())),
                _ => None,
            })
            .await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.session.close().await;
        debug!("OKX {} private channel closed", self.market());
        Ok(())
    }

    fn renewal_interval(&self) -> Duration {
        PING_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(passphrase: Option<&str>) -> AdapterConfig {
        let mut credentials = Credentials::new("key", "secret");
        if let Some(p) = passphrase {
            credentials = credentials.with_passphrase(p);
        }
        AdapterConfig {
            credentials,
            sandbox: false,
            symbols: Vec::new(),
        }
    }

    #[test]
    fn test_sign_is_base64_hmac() {
        let signature = sign("secret", "2020-12-08T09:08:57.715Z", "GET", "/api/v5/account/balance?ccy=BTC", "").unwrap();
        let decoded = general_purpose::STANDARD.decode(&signature).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_eq!(
            signature,
            sign("secret", "2020-12-08T09:08:57.715Z", "GET", "/api/v5/account/balance?ccy=BTC", "").unwrap()
        );
    }

    #[test]
    fn test_market_mapping() {
        let swap = OkxAdapter::from_config(OkxMarket::Swap, config(Some("pass")));
        assert_eq!(swap.exchange(), "okx");
        assert_eq!(swap.market(), "futures");
        assert_eq!(OkxMarket::Swap.inst_type(), "SWAP");
        assert_eq!(swap.renewal_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_login_frame() {
        let adapter = OkxAdapter::from_config(OkxMarket::Spot, config(Some("pass")));
        let token = adapter.login_frame("key", "secret").unwrap();
        let frame: Value = serde_json::from_str(token.as_str()).unwrap();
        assert_eq!(frame["op"], "login");
        assert_eq!(frame["args"][0]["apiKey"], "key");
        assert_eq!(frame["args"][0]["passphrase"], "pass");
    }

    #[tokio::test]
    async fn test_authenticate_requires_passphrase() {
        let adapter = OkxAdapter::from_config(OkxMarket::Spot, config(None));
        let result = adapter.authenticate("key", "secret").await;
        assert!(matches!(result, Err(StreamError::AuthenticationError(_))));
    }

    #[test]
    fn test_fill_into_record() {
        let fill: OkxFill = serde_json::from_value(json!({
            "instType": "SPOT", "instId": "BTC-USDT", "tradeId": "123", "ordId": "312269865356374016",
            "clOrdId": "", "billId": "9", "fillPx": "30000", "fillSz": "0.02", "side": "buy",
            "posSide": "", "execType": "T", "feeCcy": "BTC", "fee": "-0.00002",
            "ts": "1597026383085"
        }))
        .unwrap();
        let record = fill.into_record(AccountId::new(), "spot").unwrap();
        assert_eq!(record.id, "123");
        assert_eq!(record.exchange, "okx");
        assert_eq!(record.position_side, None);
        assert_eq!(record.is_maker, Some(false));
        assert_eq!(record.quote_quantity, Some(Decimal::new(600, 0)));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(classify("50111", String::new()), OkxError::AuthenticationError(_)));
        assert!(matches!(classify("50011", String::new()), OkxError::RateLimitError(_)));
        assert!(matches!(classify("51000", String::new()), OkxError::ApiError(_)));
    }
}
