use crate::cache::{client_key, ClientCache};
use crate::error::SyncError;
use crate::exchanges::{EventSink, ExchangeAdapter};
use crate::models::{Account, AccountId, ExchangeId, MarketId};
use crate::parsers::{ParseContext, ParsedEvent, ParserRegistry};
use crate::security::CredentialCipher;
use crate::store::{AccountStore, RecordStore};
use crate::streaming::reconnect::{run_with_reconnect, ReconnectPolicy};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

pub const DEFAULT_STREAM_POOL_SIZE: usize = 3;

/// (account, `"exchange:market"`)
pub type SessionKey = (AccountId, String);

struct SessionHandle {
    id: u64,
    adapter: Arc<dyn ExchangeAdapter>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type SessionMap = Arc<Mutex<HashMap<SessionKey, SessionHandle>>>;

/// Claim on a session key while its session is being set up
struct Reservation<'a> {
    starting: &'a Mutex<HashSet<SessionKey>>,
    key: SessionKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.starting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Parses inbound session messages and persists recognized records
pub struct RecordSink {
    account_id: AccountId,
    exchange: ExchangeId,
    market: MarketId,
    parsers: ParserRegistry,
    records: Arc<dyn RecordStore>,
}

impl RecordSink {
    pub fn new(
        account_id: AccountId,
        exchange: impl Into<ExchangeId>,
        market: impl Into<MarketId>,
        parsers: ParserRegistry,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            account_id,
            exchange: exchange.into(),
            market: market.into(),
            parsers,
            records,
        }
    }
}

#[async_trait]
impl EventSink for RecordSink {
    async fn on_event(&self, event: Value) {
        let ctx = ParseContext {
            account_id: self.account_id,
            exchange: &self.exchange,
            market: &self.market,
        };
        let parsed = self.parsers.parse(&ctx, &event);
        if matches!(parsed, ParsedEvent::Unrecognized) {
            debug!("Skipping unrecognized {} event", self.exchange);
            return;
        }

        let records = parsed.into_records();
        if records.is_empty() {
            debug!("Skipping {} event without an id", self.exchange);
            return;
        }
        for record in records {
            let id = record.id.clone();
            match self.records.upsert(record).await {
                Ok(_) => debug!(
                    "Stored {} {} event {} for {}",
                    self.exchange, self.market, id, self.account_id
                ),
                Err(e) => error!(
                    "Failed to store {} event {} for {}: {}",
                    self.exchange, id, self.account_id, e
                ),
            }
        }
    }
}

/// Owns every live user-data session of the process
pub struct StreamOrchestrator {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<ClientCache>,
    cipher: Arc<dyn CredentialCipher>,
    parsers: ParserRegistry,
    policy: ReconnectPolicy,
    pool_size: usize,
    sessions: SessionMap,
    starting: Mutex<HashSet<SessionKey>>,
    next_id: AtomicU64,
}

impl StreamOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        cache: Arc<ClientCache>,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        Self {
            accounts,
            records,
            cache,
            cipher,
            parsers: ParserRegistry::with_defaults(),
            policy: ReconnectPolicy::default(),
            pool_size: DEFAULT_STREAM_POOL_SIZE,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            starting: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Start sessions for every stored account in the background
    pub fn start_all(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let accounts = match orchestrator.accounts.list_accounts().await {
                Ok(accounts) => accounts,
                Err(e) => {
                    error!("Failed to list accounts for streaming: {}", e);
                    return;
                }
            };
            info!("Starting user data streams for {} accounts", accounts.len());

            let starts = accounts.iter().map(|account| orchestrator.start_one(account));
            let started: usize = join_all(starts).await.into_iter().sum();
            info!("{} user data sessions running", started);
        })
    }

    /// Start a session per declared market of `account`, at most `pool_size` at once.
    ///
    /// Returns the number of sessions started; failures are logged.
    pub async fn start_one(self: &Arc<Self>, account: &Account) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let markets = account.streaming_markets();

        let attempts = markets.iter().map(|market| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return false,
                };
                match self.start_market(account, market).await {
                    Ok(started) => started,
                    Err(e) => {
                        error!(
                            "Failed to start {} {} stream for account {}: {}",
                            account.exchange, market, account.id, e
                        );
                        false
                    }
                }
            }
        });

        join_all(attempts).await.into_iter().filter(|started| *started).count()
    }

    /// Returns `Ok(false)` when the session is already running
    async fn start_market(self: &Arc<Self>, account: &Account, market: &str) -> Result<bool, SyncError> {
        let key: SessionKey = (account.id, client_key(&account.exchange, market));
        let Some(_reservation) = self.reserve(&key) else {
            debug!("Session {} for {} already running", key.1, account.id);
            return Ok(false);
        };

        let credentials = account.decrypt_credentials(self.cipher.as_ref())?;
        let adapter = self.cache.get_or_create_market(account, market).await?;
        let stream = adapter.streaming().ok_or_else(|| {
            SyncError::Configuration(format!("{} has no user data stream", key.1))
        })?;

        let token = stream
            .authenticate(credentials.api_key.expose(), credentials.secret.expose())
            .await?;
        stream.connect(&token).await?;

        let sink = RecordSink::new(
            account.id,
            account.exchange.clone(),
            market,
            self.parsers.clone(),
            self.records.clone(),
        );
        self.spawn_session(key, adapter, sink);
        info!("Started {} {} stream for account {}", account.exchange, market, account.id);
        Ok(true)
    }

    /// Claim `key` unless a session holds it or another start is setting it up
    fn reserve(&self, key: &SessionKey) -> Option<Reservation<'_>> {
        let sessions = self.lock_sessions();
        let mut starting = self.starting.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(key) || !starting.insert(key.clone()) {
            return None;
        }
        Some(Reservation {
            starting: &self.starting,
            key: key.clone(),
        })
    }

    fn spawn_session(&self, key: SessionKey, adapter: Arc<dyn ExchangeAdapter>, sink: RecordSink) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let policy = self.policy.clone();
        let sessions = self.sessions.clone();
        let task_adapter = adapter.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let label = format!("{} session for {}", task_key.1, task_key.0);
            if let Some(stream) = task_adapter.streaming() {
                let result =
                    run_with_reconnect(&policy, &mut stop_rx, &label, || stream.listen(&sink))
                        .await;
                match result {
                    Ok(failures) => debug!("{} ended after {} reconnects", label, failures),
                    Err(e) => error!("{} gave up: {}", label, e),
                }
            }

            let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
            if sessions.get(&task_key).map(|h| h.id) == Some(id) {
                sessions.remove(&task_key);
            }
        });

        let handle = SessionHandle {
            id,
            adapter,
            stop_tx,
            task,
        };
        self.lock_sessions().insert(key, handle);
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self, key: &SessionKey) -> bool {
        self.lock_sessions().contains_key(key)
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.lock_sessions().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop one session: signal, close the socket, join the task
    pub async fn stop_session(&self, account_id: &AccountId, client: &str) -> bool {
        let handle = self.lock_sessions().remove(&(*account_id, client.to_string()));
        match handle {
            Some(handle) => {
                Self::shut(handle).await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_account(&self, account_id: &AccountId) -> usize {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.lock_sessions();
            let keys: Vec<SessionKey> = sessions
                .keys()
                .filter(|(id, _)| id == account_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };
        let count = handles.len();
        join_all(handles.into_iter().map(Self::shut)).await;
        count
    }

    pub async fn stop_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self.lock_sessions().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        join_all(handles.into_iter().map(Self::shut)).await;
        if count > 0 {
            info!("Stopped {} user data sessions", count);
        }
        count
    }

    async fn shut(handle: SessionHandle) {
        handle.stop_tx.send_replace(true);
        if let Some(stream) = handle.adapter.streaming() {
            if let Err(e) = stream.close().await {
                warn!(
                    "Error closing {}:{} session: {}",
                    handle.adapter.exchange(),
                    handle.adapter.market(),
                    e
                );
            }
        }
        if let Err(e) = handle.task.await {
            warn!("Session task ended abnormally: {}", e);
        }
    }
}
