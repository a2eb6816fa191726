use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use trade_sync::exchanges::{OkxAdapter, OkxEndpoints, OkxMarket};
use trade_sync::{
    AccountId, AdapterConfig, Credentials, FetchError, MemoryStore, RecordStore, TradeHistory,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const BASE_TS: i64 = 1_700_000_000_000;

fn adapter(server: &MockServer, passphrase: Option<&str>) -> OkxAdapter {
    let mut credentials = Credentials::new("okx-key", "okx-secret");
    if let Some(p) = passphrase {
        credentials = credentials.with_passphrase(p);
    }
    let config = AdapterConfig {
        credentials,
        sandbox: true,
        symbols: Vec::new(),
    };
    let endpoints = OkxEndpoints {
        rest_url: server.uri(),
        ws_url: "ws://127.0.0.1:1/ws/v5/private".to_string(),
        simulated: true,
    };
    OkxAdapter::new(OkxMarket::Spot, config, endpoints)
}

fn fill(n: i64) -> Value {
    json!({
        "instType": "SPOT", "instId": "BTC-USDT", "tradeId": n.to_string(),
        "ordId": (n * 10).to_string(), "clOrdId": "", "billId": n.to_string(),
        "tag": "", "fillPx": "30000", "fillSz": "0.01", "side": "buy", "posSide": "",
        "execType": "T", "feeCcy": "BTC", "fee": "-0.00001", "ts": (BASE_TS + n).to_string()
    })
}

fn query(request: &Request, key: &str) -> Option<i64> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

/// fills-history over `total` fills: newest first, `ts > begin`, `billId < after`, at most `limit`
async fn mount_fills(server: &MockServer, total: i64) {
    Mock::given(method("GET"))
        .and(path("/api/v5/trade/fills-history"))
        .and(header("OK-ACCESS-KEY", "okx-key"))
        .and(header("OK-ACCESS-PASSPHRASE", "okx-pass"))
        .and(header("x-simulated-trading", "1"))
        .respond_with(move |request: &Request| {
            let begin = query(request, "begin").unwrap_or(i64::MIN);
            let after = query(request, "after").unwrap_or(i64::MAX);
            let limit = query(request, "limit").unwrap_or(100) as usize;
            let data: Vec<Value> = (1..=total)
                .rev()
                .filter(|n| BASE_TS + n > begin && *n < after)
                .take(limit)
                .map(fill)
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({"code": "0", "msg": "", "data": data}))
        })
        .mount(server)
        .await;
}

async fn sync_pass(adapter: &OkxAdapter, store: &MemoryStore, account: &AccountId) -> usize {
    let since: Option<DateTime<Utc>> = store
        .latest(account, "okx", "spot")
        .await
        .unwrap()
        .map(|r| r.time);
    let records = adapter.fetch_trades(account, since).await.unwrap();
    let fetched = records.len();
    store.upsert_many(records).await.unwrap();
    fetched
}

#[tokio::test]
async fn test_full_pages_are_walked_back_to_the_cursor() {
    let server = MockServer::start().await;
    mount_fills(&server, 250).await;
    let adapter = adapter(&server, Some("okx-pass"));
    let store = MemoryStore::new();
    let account = AccountId::new();

    let mut fetched = Vec::new();
    for _ in 0..3 {
        fetched.push(sync_pass(&adapter, &store, &account).await);
    }
    assert_eq!(fetched, vec![250, 0, 0]);

    let records = store.records_for_account(&account).await.unwrap();
    assert_eq!(records.len(), 250);
    let oldest = records.iter().map(|r| r.time).min().unwrap();
    assert_eq!(oldest, Utc.timestamp_millis_opt(BASE_TS + 1).unwrap());

    let requests = server.received_requests().await.unwrap();
    // 100 + 100 + 50 on the first pass, then one short page per pass
    assert_eq!(requests.len(), 5);
    assert_eq!(query(&requests[0], "after"), None);
    assert_eq!(query(&requests[1], "after"), Some(151));
    assert_eq!(query(&requests[2], "after"), Some(51));
    assert_eq!(query(&requests[3], "begin"), Some(BASE_TS + 250));
}

#[tokio::test]
async fn test_large_backlog_is_taken_oldest_first() {
    let server = MockServer::start().await;
    mount_fills(&server, 1200).await;
    let adapter = adapter(&server, Some("okx-pass"));
    let store = MemoryStore::new();
    let account = AccountId::new();

    assert_eq!(sync_pass(&adapter, &store, &account).await, 1000);
    let latest = store.latest(&account, "okx", "spot").await.unwrap().unwrap();
    assert_eq!(latest.id, "1000");

    assert_eq!(sync_pass(&adapter, &store, &account).await, 200);
    assert_eq!(store.records_for_account(&account).await.unwrap().len(), 1200);
}

#[tokio::test]
async fn test_fill_fields_are_mapped() {
    let server = MockServer::start().await;
    mount_fills(&server, 1).await;
    let account = AccountId::new();

    let records = adapter(&server, Some("okx-pass"))
        .fetch_trades(&account, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, "1");
    assert_eq!(record.order_id.as_deref(), Some("10"));
    assert_eq!(record.exchange, "okx");
    assert_eq!(record.market, "spot");
    assert_eq!(record.symbol, "BTC-USDT");
    assert_eq!(record.is_maker, Some(false));
    assert_eq!(record.account_id, account);
}

#[tokio::test]
async fn test_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("OK-ACCESS-PASSPHRASE", "expired"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "50111", "msg": "Invalid OK-ACCESS-KEY", "data": []})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("OK-ACCESS-PASSPHRASE", "busy"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": "50011", "msg": "Too Many Requests", "data": []})),
        )
        .mount(&server)
        .await;

    let auth = adapter(&server, Some("expired")).fetch_trades(&AccountId::new(), None).await;
    assert!(matches!(auth, Err(FetchError::AuthenticationError(_))));

    let limited = adapter(&server, Some("busy")).fetch_trades(&AccountId::new(), None).await;
    assert!(matches!(limited, Err(FetchError::RateLimitError(_))));
}

#[tokio::test]
async fn test_missing_passphrase_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "0", "data": []})))
        .expect(0)
        .mount(&server)
        .await;

    let result = adapter(&server, None).fetch_trades(&AccountId::new(), None).await;
    assert!(matches!(result, Err(FetchError::AuthenticationError(_))));
}
