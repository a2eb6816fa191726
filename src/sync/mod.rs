//! Scheduled pull of trade history into the record store.
//!
//! A run fans out over accounts (bounded by the account pool), then over each
//! account's history-capable clients (bounded by the client pool). The cursor
//! for each (account, exchange, market) is the newest stored record, so a pull
//! only asks for what is not yet stored.

use crate::cache::ClientCache;
use crate::cancel::CancellationSignal;
use crate::error::{FetchError, SyncError};
use crate::exchanges::ExchangeAdapter;
use crate::models::Account;
use crate::store::{AccountStore, RecordStore};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

pub const DEFAULT_ACCOUNT_POOL_SIZE: usize = 5;
pub const DEFAULT_CLIENT_POOL_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    AccountFanOut,
    PerAccountClientFanOut,
}

/// Outcome of one `sync_all` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records inserted or updated
    pub records: usize,
    pub cancelled: bool,
    /// Another run was still in progress
    pub skipped: bool,
}

pub struct TradeSyncService {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<ClientCache>,
    account_pool_size: usize,
    client_pool_size: usize,
    run_lock: Mutex<()>,
    running: AtomicBool,
    client_fan_outs: AtomicUsize,
}

impl TradeSyncService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        cache: Arc<ClientCache>,
    ) -> Self {
        Self {
            accounts,
            records,
            cache,
            account_pool_size: DEFAULT_ACCOUNT_POOL_SIZE,
            client_pool_size: DEFAULT_CLIENT_POOL_SIZE,
            run_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            client_fan_outs: AtomicUsize::new(0),
        }
    }

    pub fn with_pool_sizes(mut self, account_pool_size: usize, client_pool_size: usize) -> Self {
        self.account_pool_size = account_pool_size.max(1);
        self.client_pool_size = client_pool_size.max(1);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        if self.client_fan_outs.load(Ordering::SeqCst) > 0 {
            SyncPhase::PerAccountClientFanOut
        } else if self.running.load(Ordering::SeqCst) {
            SyncPhase::AccountFanOut
        } else {
            SyncPhase::Idle
        }
    }

    /// Pull every stored account. Only listing the accounts can fail the run.
    pub async fn sync_all(&self, cancel: &CancellationSignal) -> Result<SyncReport, SyncError> {
        let _run = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous trade history sync still running, skipping this cycle");
                return Ok(SyncReport {
                    skipped: true,
                    ..SyncReport::default()
                });
            }
        };

        let accounts = self.accounts.list_accounts().await?;
        info!("Starting trade history sync for {} accounts", accounts.len());

        self.running.store(true, Ordering::SeqCst);
        let semaphore = Arc::new(Semaphore::new(self.account_pool_size));
        let runs = accounts.iter().map(|account| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| SyncError::Configuration(e.to_string()))?;
                self.sync_one(cancel, account).await
            }
        });
        let results = join_all(runs).await;
        self.running.store(false, Ordering::SeqCst);

        let mut report = SyncReport {
            accounts: accounts.len(),
            ..SyncReport::default()
        };
        for (account, result) in accounts.iter().zip(results) {
            match result {
                Ok(count) => {
                    report.succeeded += 1;
                    report.records += count;
                }
                Err(SyncError::Fetch(FetchError::Cancelled)) => {
                    report.failed += 1;
                    report.cancelled = true;
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Trade history sync failed for account {}: {}", account.id, e);
                }
            }
        }

        info!(
            "Trade history sync finished: {}/{} accounts, {} records{}",
            report.succeeded,
            report.accounts,
            report.records,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Pull every history-capable client of one account; returns records upserted
    pub async fn sync_one(
        &self,
        cancel: &CancellationSignal,
        account: &Account,
    ) -> Result<usize, SyncError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled.into());
        }

        let clients = self.cache.get_or_create(account).await?;
        let adapters: Vec<Arc<dyn ExchangeAdapter>> = clients
            .into_values()
            .filter(|adapter| adapter.history().is_some())
            .collect();
        if adapters.is_empty() {
            debug!("Account {} has no history-capable clients", account.id);
            return Ok(0);
        }

        self.client_fan_outs.fetch_add(1, Ordering::SeqCst);
        let semaphore = Arc::new(Semaphore::new(self.client_pool_size));
        let pulls = adapters.iter().map(|adapter| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| SyncError::Configuration(e.to_string()))?;
                self.sync_client(cancel, account, adapter.as_ref()).await
            }
        });
        let results = join_all(pulls).await;
        self.client_fan_outs.fetch_sub(1, Ordering::SeqCst);

        let mut total = 0;
        let mut cancelled = false;
        for (adapter, result) in adapters.iter().zip(results) {
            match result {
                Ok(count) => total += count,
                Err(SyncError::Fetch(FetchError::Cancelled)) => cancelled = true,
                Err(e) => error!(
                    "Failed to sync {}:{} for account {}: {}",
                    adapter.exchange(),
                    adapter.market(),
                    account.id,
                    e
                ),
            }
        }

        if cancelled {
            return Err(FetchError::Cancelled.into());
        }
        Ok(total)
    }

    async fn sync_client(
        &self,
        cancel: &CancellationSignal,
        account: &Account,
        adapter: &dyn ExchangeAdapter,
    ) -> Result<usize, SyncError> {
        let history = match adapter.history() {
            Some(history) => history,
            None => return Ok(0),
        };

        let since = self
            .records
            .latest(&account.id, adapter.exchange(), adapter.market())
            .await?
            .map(|record| record.time);

        let records = cancel
            .run(history.fetch_trades(&account.id, since))
            .await
            .unwrap_or(Err(FetchError::Cancelled))?;
        if records.is_empty() {
            debug!(
                "No new {}:{} trades for account {}",
                adapter.exchange(),
                adapter.market(),
                account.id
            );
            return Ok(0);
        }

        let summary = self.records.upsert_many(records).await?;
        info!(
            "Synced {}:{} for account {}: {} inserted, {} updated",
            adapter.exchange(),
            adapter.market(),
            account.id,
            summary.inserted,
            summary.updated
        );
        Ok(summary.total())
    }
}
