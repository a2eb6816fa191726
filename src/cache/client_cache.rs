use crate::error::SyncError;
use crate::exchanges::{AdapterConfig, AdapterRegistry, ExchangeAdapter};
use crate::models::{Account, AccountId, MarketId};
use crate::security::CredentialCipher;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Clients of one account keyed by `"exchange:market"`
pub type ClientSet = HashMap<String, Arc<dyn ExchangeAdapter>>;

pub const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub fn client_key(exchange: &str, market: &str) -> String {
    format!("{}:{}", exchange, market)
}

struct CacheEntry {
    clients: ClientSet,
    created_at: Instant,
}

/// Creation lock of one account. `generation` moves on every invalidate so a
/// creator that started before it does not cache what it built.
#[derive(Default)]
struct AccountSlot {
    lock: RwLock<()>,
    generation: AtomicU64,
}

struct Sweeper {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Per-process cache of exchange clients, at most one per (account, exchange, market).
///
/// Creation is serialized per account; different accounts never block each other.
pub struct ClientCache {
    registry: AdapterRegistry,
    cipher: Arc<dyn CredentialCipher>,
    ttl: Duration,
    entries: DashMap<AccountId, CacheEntry>,
    locks: Mutex<HashMap<AccountId, Arc<AccountSlot>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ClientCache {
    pub fn new(registry: AdapterRegistry, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self::with_ttl(registry, cipher, DEFAULT_CLIENT_TTL)
    }

    pub fn with_ttl(
        registry: AdapterRegistry,
        cipher: Arc<dyn CredentialCipher>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            cipher,
            ttl,
            entries: DashMap::new(),
            locks: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Clients for the account's primary market, created on first use
    pub async fn get_or_create(&self, account: &Account) -> Result<ClientSet, SyncError> {
        let adapter = self.get_or_create_market(account, &account.market).await?;
        let mut set = ClientSet::new();
        set.insert(client_key(&account.exchange, &account.market), adapter);
        Ok(set)
    }

    /// Client for one declared market of the account
    pub async fn get_or_create_market(
        &self,
        account: &Account,
        market: &str,
    ) -> Result<Arc<dyn ExchangeAdapter>, SyncError> {
        let key = client_key(&account.exchange, market);
        if let Some(adapter) = self.lookup(&account.id, &key) {
            return Ok(adapter);
        }

        let slot = self.account_slot(account.id);
        {
            let _shared = slot.lock.read().await;
            if let Some(adapter) = self.lookup(&account.id, &key) {
                return Ok(adapter);
            }
        }

        let _guard = slot.lock.write().await;
        if let Some(adapter) = self.lookup(&account.id, &key) {
            return Ok(adapter);
        }

        let generation = slot.generation.load(Ordering::SeqCst);
        let adapter = self.create(account, market)?;
        let now = Instant::now();
        let mut entry = self.entries.entry(account.id).or_insert_with(|| CacheEntry {
            clients: ClientSet::new(),
            created_at: now,
        });
        if slot.generation.load(Ordering::SeqCst) != generation {
            // Invalidated mid-build; the entry lock orders this against the removal
            let empty = entry.clients.is_empty();
            drop(entry);
            if empty {
                self.entries.remove_if(&account.id, |_, e| e.clients.is_empty());
            }
            debug!(account = %account.id, client = %key, "Account invalidated during creation, client not cached");
            return Ok(adapter);
        }
        if now.duration_since(entry.created_at) >= self.ttl {
            entry.clients.clear();
            entry.created_at = now;
        }
        entry.clients.insert(key.clone(), adapter.clone());
        drop(entry);

        info!(account = %account.id, client = %key, "Created exchange client");
        Ok(adapter)
    }

    fn create(&self, account: &Account, market: &str) -> Result<Arc<dyn ExchangeAdapter>, SyncError> {
        let credentials = account.decrypt_credentials(self.cipher.as_ref())?;
        let config = AdapterConfig {
            credentials,
            sandbox: account.sandbox,
            symbols: account.symbols.clone(),
        };
        self.registry.create(&account.exchange, market, config)
    }

    fn lookup(&self, account_id: &AccountId, key: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        let entry = self.entries.get(account_id)?;
        if entry.created_at.elapsed() >= self.ttl {
            return None;
        }
        entry.clients.get(key).cloned()
    }

    fn account_slot(&self, account_id: AccountId) -> Arc<AccountSlot> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(account_id).or_default().clone()
    }

    /// Drop every client of the account; the next request rebuilds them.
    ///
    /// The account lock is only removed once no creator holds it.
    pub fn invalidate(&self, account_id: &AccountId) {
        {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            let idle = match locks.get(account_id) {
                Some(slot) => {
                    slot.generation.fetch_add(1, Ordering::SeqCst);
                    Arc::strong_count(slot) == 1
                }
                None => false,
            };
            if idle {
                locks.remove(account_id);
            }
        }
        self.entries.remove(account_id);
        debug!(account = %account_id, "Invalidated exchange clients");
    }

    /// Remove entries older than `max_age` and idle locks. Returns entries removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() < max_age);
        let removed = before.saturating_sub(self.entries.len());

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|id, lock| self.entries.contains_key(id) || Arc::strong_count(lock) > 1);

        if removed > 0 {
            info!(removed, "Expired exchange clients removed");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.clients.len()).sum()
    }

    pub fn account_count(&self) -> usize {
        self.entries.len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Sweep expired entries every `interval` until `shutdown`
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match weak.upgrade() {
                            Some(cache) => {
                                let ttl = cache.ttl;
                                cache.cleanup(ttl);
                            }
                            None => break,
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Client cache sweeper stopped");
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Sweeper { stop_tx, handle });
        if let Some(previous) = previous {
            previous.stop_tx.send_replace(true);
            previous.handle.abort();
        }
    }

    /// Stop the sweeper, close streaming clients and empty the cache
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop_tx.send_replace(true);
            if let Err(e) = sweeper.handle.await {
                warn!("Client cache sweeper ended abnormally: {}", e);
            }
        }

        let adapters: Vec<Arc<dyn ExchangeAdapter>> = self
            .entries
            .iter()
            .flat_map(|entry| entry.clients.values().cloned().collect::<Vec<_>>())
            .collect();
        self.entries.clear();
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).clear();

        for adapter in adapters {
            if let Some(stream) = adapter.streaming() {
                if let Err(e) = stream.close().await {
                    warn!(
                        exchange = adapter.exchange(),
                        market = adapter.market(),
                        "Failed to close streaming client: {}",
                        e
                    );
                }
            }
        }
        info!("Client cache shut down");
    }

    /// Markets of the account currently cached
    pub fn cached_markets(&self, account_id: &AccountId) -> Vec<MarketId> {
        self.entries
            .get(account_id)
            .map(|entry| {
                let mut markets: Vec<MarketId> = entry
                    .clients
                    .values()
                    .map(|a| a.market().to_string())
                    .collect();
                markets.sort();
                markets
            })
            .unwrap_or_default()
    }
}
