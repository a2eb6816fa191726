use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use trade_sync::{
    client_key, Account, AccountStore, AdapterRegistry, AesGcmCipher, ClientCache, EventSink,
    ExchangeAdapter, MemoryStore, RecordStore, SessionToken, StreamError, StreamOrchestrator,
    UserDataStream,
};

/// User data stream whose first `failures` listens drop, then delivers `events`
struct FakeStream {
    failures: u32,
    hold_open: bool,
    events: Vec<serde_json::Value>,
    listens: AtomicU32,
    authentications: AtomicU32,
    closed: AtomicBool,
    close_notify: Notify,
}

impl FakeStream {
    fn new(failures: u32, hold_open: bool, events: Vec<serde_json::Value>) -> Self {
        Self {
            failures,
            hold_open,
            events,
            listens: AtomicU32::new(0),
            authentications: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }
}

impl ExchangeAdapter for FakeStream {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn market(&self) -> &str {
        "spot"
    }

    fn streaming(&self) -> Option<&dyn UserDataStream> {
        Some(self)
    }
}

#[async_trait]
impl UserDataStream for FakeStream {
    async fn authenticate(&self, api_key: &str, _secret: &str) -> Result<SessionToken, StreamError> {
        assert_eq!(api_key, "key");
        self.authentications.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(SessionToken::new("listen-key"))
    }

    async fn connect(&self, token: &SessionToken) -> Result<(), StreamError> {
        assert_eq!(token.as_str(), "listen-key");
        Ok(())
    }

    async fn listen(&self, sink: &dyn EventSink) -> Result<(), StreamError> {
        let attempt = self.listens.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(StreamError::Disconnected("socket reset".to_string()));
        }
        for event in &self.events {
            sink.on_event(event.clone()).await;
        }
        if self.hold_open {
            self.close_notify.notified().await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_one();
        Ok(())
    }

    fn renewal_interval(&self) -> Duration {
        Duration::from_secs(30 * 60)
    }
}

struct Harness {
    orchestrator: Arc<StreamOrchestrator>,
    store: Arc<MemoryStore>,
    account: Account,
}

async fn harness(stream: Arc<FakeStream>) -> Harness {
    let cipher = Arc::new(AesGcmCipher::new(b"0123456789abcdef").unwrap());
    let mut registry = AdapterRegistry::new();
    registry.register("binance", "spot", move |_| stream.clone());

    let store = Arc::new(MemoryStore::new());
    let account = Account::register(cipher.as_ref(), "a", "binance", "spot", "key", "secret", None, false)
        .unwrap();
    store.save_account(account.clone()).await.unwrap();

    let cache = Arc::new(ClientCache::new(registry, cipher.clone()));
    let orchestrator = Arc::new(StreamOrchestrator::new(
        store.clone(),
        store.clone(),
        cache,
        cipher,
    ));
    Harness {
        orchestrator,
        store,
        account,
    }
}

fn execution_report(order_id: u64) -> serde_json::Value {
    json!({
        "e": "executionReport", "E": 1499405658658u64, "s": "ETHBTC", "S": "BUY",
        "o": "LIMIT", "q": "1.00000000", "p": "0.10264410", "X": "FILLED",
        "i": order_id, "z": "1.00000000", "Z": "0.10264410", "n": "0.0001",
        "N": "BNB", "T": 1499405658657u64, "m": false
    })
}

#[tokio::test(start_paused = true)]
async fn test_session_reconnects_after_drops() {
    let stream = Arc::new(FakeStream::new(3, false, vec![execution_report(4293153)]));
    let h = harness(stream.clone()).await;
    let key = (h.account.id, client_key("binance", "spot"));
    let start = Instant::now();

    assert_eq!(h.orchestrator.start_one(&h.account).await, 1);
    while h.orchestrator.is_running(&key) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(stream.listens.load(Ordering::SeqCst), 4);
    assert!(start.elapsed() >= Duration::from_secs(15));
    let records = h.store.records_for_account(&h.account.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "4293153");
    assert_eq!(records[0].status, "FILLED");
}

#[tokio::test]
async fn test_unrecognized_events_write_nothing() {
    let events = vec![
        json!({"e": "outboundAccountPosition", "E": 1564034571105u64, "B": []}),
        json!({"e": "balanceUpdate", "a": "BTC", "d": "100.00000000"}),
        json!("pong"),
    ];
    let stream = Arc::new(FakeStream::new(0, true, events));
    let h = harness(stream.clone()).await;

    assert_eq!(h.orchestrator.start_one(&h.account).await, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.orchestrator.stop_all().await, 1);
}

#[tokio::test]
async fn test_stop_closes_and_joins_session() {
    let stream = Arc::new(FakeStream::new(0, true, Vec::new()));
    let h = harness(stream.clone()).await;

    assert_eq!(h.orchestrator.start_one(&h.account).await, 1);
    // Starting again is a no-op while the session lives
    assert_eq!(h.orchestrator.start_one(&h.account).await, 0);
    assert_eq!(h.orchestrator.session_count(), 1);

    assert!(
        h.orchestrator
            .stop_session(&h.account.id, &client_key("binance", "spot"))
            .await
    );
    assert!(stream.closed.load(Ordering::SeqCst));
    assert_eq!(h.orchestrator.session_count(), 0);
    assert!(
        !h.orchestrator
            .stop_session(&h.account.id, &client_key("binance", "spot"))
            .await
    );
}

#[tokio::test]
async fn test_start_all_covers_every_account() {
    let stream = Arc::new(FakeStream::new(0, true, Vec::new()));
    let h = harness(stream.clone()).await;

    h.orchestrator.start_all().await.unwrap();
    assert_eq!(
        h.orchestrator.session_keys(),
        vec![(h.account.id, "binance:spot".to_string())]
    );
    assert_eq!(h.orchestrator.stop_account(&h.account.id).await, 1);
}

#[tokio::test]
async fn test_concurrent_starts_run_one_session() {
    let stream = Arc::new(FakeStream::new(0, true, Vec::new()));
    let h = harness(stream.clone()).await;

    let (first, second) = tokio::join!(
        h.orchestrator.start_one(&h.account),
        h.orchestrator.start_one(&h.account)
    );
    assert_eq!(first + second, 1);
    assert_eq!(stream.authentications.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.session_count(), 1);

    assert_eq!(h.orchestrator.stop_all().await, 1);
    // The stopped session's key can be started again
    assert_eq!(h.orchestrator.start_one(&h.account).await, 1);
    assert_eq!(h.orchestrator.stop_all().await, 1);
}
