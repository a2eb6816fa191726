use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trade_sync::{
    Account, AccountId, AccountStore, AdapterRegistry, AesGcmCipher, CancellationSignal,
    ClientCache, ExchangeAdapter, FetchError, MemoryStore, Record, RecordStore, SyncError,
    TradeHistory, TradeSyncService,
};

fn cipher() -> Arc<AesGcmCipher> {
    Arc::new(AesGcmCipher::new(b"0123456789abcdef0123456789abcdef").unwrap())
}

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

/// Tracks how many fetches are in flight at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeHistory {
    gauge: Arc<Gauge>,
}

impl ExchangeAdapter for GaugeHistory {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn market(&self) -> &str {
        "spot"
    }

    fn history(&self) -> Option<&dyn TradeHistory> {
        Some(self)
    }
}

#[async_trait]
impl TradeHistory for GaugeHistory {
    async fn fetch_trades(
        &self,
        account_id: &AccountId,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError> {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Record::new("1", *account_id, "binance", "spot", at(1_000))])
    }
}

/// Serves whatever trades the test has queued, filtered by the cursor like the exchange does
struct ScriptedHistory {
    trades: Arc<Mutex<Vec<i64>>>,
    fail: bool,
}

impl ExchangeAdapter for ScriptedHistory {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn market(&self) -> &str {
        "spot"
    }

    fn history(&self) -> Option<&dyn TradeHistory> {
        Some(self)
    }
}

#[async_trait]
impl TradeHistory for ScriptedHistory {
    async fn fetch_trades(
        &self,
        account_id: &AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError> {
        if self.fail {
            return Err(FetchError::RateLimitError("429".to_string()));
        }
        let trades = self.trades.lock().unwrap().clone();
        Ok(trades
            .into_iter()
            .filter(|ms| since.map_or(true, |s| at(*ms) > s))
            .map(|ms| Record::new(ms.to_string(), *account_id, "binance", "spot", at(ms)))
            .collect())
    }
}

/// Never returns on its own
struct HangingHistory;

impl ExchangeAdapter for HangingHistory {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn market(&self) -> &str {
        "spot"
    }

    fn history(&self) -> Option<&dyn TradeHistory> {
        Some(self)
    }
}

#[async_trait]
impl TradeHistory for HangingHistory {
    async fn fetch_trades(
        &self,
        _account_id: &AccountId,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, FetchError> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

async fn seed_accounts(store: &MemoryStore, cipher: &AesGcmCipher, count: usize) -> Vec<Account> {
    let mut accounts = Vec::new();
    for i in 0..count {
        let account = Account::register(
            cipher,
            format!("account-{:02}", i),
            "binance",
            "spot",
            "key",
            "secret",
            None,
            false,
        )
        .unwrap();
        store.save_account(account.clone()).await.unwrap();
        accounts.push(account);
    }
    accounts
}

#[tokio::test(start_paused = true)]
async fn test_account_fan_out_is_bounded() {
    let cipher = cipher();
    let gauge = Arc::new(Gauge::default());
    let mut registry = AdapterRegistry::new();
    let shared = gauge.clone();
    registry.register("binance", "spot", move |_| {
        Arc::new(GaugeHistory {
            gauge: shared.clone(),
        })
    });

    let store = Arc::new(MemoryStore::new());
    seed_accounts(&store, &cipher, 12).await;
    let cache = Arc::new(ClientCache::new(registry, cipher));
    let service = TradeSyncService::new(store.clone(), store.clone(), cache);

    let report = service.sync_all(&CancellationSignal::new()).await.unwrap();

    assert_eq!(report.accounts, 12);
    assert_eq!(report.succeeded, 12);
    assert_eq!(report.records, 12);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 5, "peak concurrency {} exceeds the account pool", peak);
    assert!(peak > 1, "accounts were not synced concurrently");
}

#[tokio::test]
async fn test_incremental_sync_stores_only_new_trades() {
    let cipher = cipher();
    let trades = Arc::new(Mutex::new(vec![1_000, 2_000]));
    let mut registry = AdapterRegistry::new();
    let queued = trades.clone();
    registry.register("binance", "spot", move |_| {
        Arc::new(ScriptedHistory {
            trades: queued.clone(),
            fail: false,
        })
    });

    let store = Arc::new(MemoryStore::new());
    let account = seed_accounts(&store, &cipher, 1).await.remove(0);
    let cache = Arc::new(ClientCache::new(registry, cipher));
    let service = TradeSyncService::new(store.clone(), store.clone(), cache);
    let signal = CancellationSignal::new();

    let first = service.sync_all(&signal).await.unwrap();
    assert_eq!(first.records, 2);

    trades.lock().unwrap().extend([3_000, 4_000, 5_000]);
    let second = service.sync_all(&signal).await.unwrap();
    assert_eq!(second.records, 3);

    let stored = store.records_for_account(&account.id).await.unwrap();
    let ids: Vec<&str> = stored.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["1000", "2000", "3000", "4000", "5000"]);
    assert_eq!(
        store.latest(&account.id, "binance", "spot").await.unwrap().unwrap().time,
        at(5_000)
    );
}

#[tokio::test]
async fn test_one_failing_account_does_not_stop_the_others() {
    let cipher = cipher();
    let mut registry = AdapterRegistry::new();
    registry.register("binance", "spot", |_| {
        Arc::new(ScriptedHistory {
            trades: Arc::new(Mutex::new(vec![1_000])),
            fail: false,
        })
    });
    registry.register("binance", "futures", |_| {
        Arc::new(ScriptedHistory {
            trades: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        })
    });

    let store = Arc::new(MemoryStore::new());
    seed_accounts(&store, &cipher, 2).await;
    let broken = Account::register(cipher.as_ref(), "broken", "binance", "futures", "k", "s", None, false)
        .unwrap();
    store.save_account(broken).await.unwrap();
    let unsupported = Account::register(cipher.as_ref(), "other", "kraken", "spot", "k", "s", None, false)
        .unwrap();
    store.save_account(unsupported).await.unwrap();

    let cache = Arc::new(ClientCache::new(registry, cipher));
    let service = TradeSyncService::new(store.clone(), store.clone(), cache);
    let report = service.sync_all(&CancellationSignal::new()).await.unwrap();

    assert_eq!(report.accounts, 4);
    // The rate-limited client is logged per client; its account still completes
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.records, 2);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_cancel_stops_in_flight_fetches() {
    let cipher = cipher();
    let mut registry = AdapterRegistry::new();
    registry.register("binance", "spot", |_| Arc::new(HangingHistory));

    let store = Arc::new(MemoryStore::new());
    seed_accounts(&store, &cipher, 3).await;
    let cache = Arc::new(ClientCache::new(registry, cipher));
    let service = Arc::new(TradeSyncService::new(store.clone(), store.clone(), cache));

    let signal = CancellationSignal::new();
    let run = {
        let service = service.clone();
        let signal = signal.clone();
        tokio::spawn(async move { service.sync_all(&signal).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("sync did not stop after cancel")
        .unwrap()
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.succeeded, 0);
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn test_listing_failure_is_the_only_run_error() {
    struct DownStore;

    #[async_trait]
    impl AccountStore for DownStore {
        async fn list_accounts(&self) -> Result<Vec<Account>, trade_sync::StoreError> {
            Err(trade_sync::StoreError::Unavailable("connection refused".to_string()))
        }

        async fn get_account(
            &self,
            _account_id: &AccountId,
        ) -> Result<Option<Account>, trade_sync::StoreError> {
            Ok(None)
        }

        async fn save_account(&self, _account: Account) -> Result<(), trade_sync::StoreError> {
            Ok(())
        }
    }

    let cache = Arc::new(ClientCache::new(AdapterRegistry::new(), cipher()));
    let service = TradeSyncService::new(Arc::new(DownStore), Arc::new(MemoryStore::new()), cache);

    let err = service.sync_all(&CancellationSignal::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
}
