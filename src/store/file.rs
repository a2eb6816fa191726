use crate::error::StoreError;
use crate::models::{Account, AccountId, Record};
use crate::store::memory::MemoryStore;
use crate::store::{AccountStore, RecordStore, UpsertSummary};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Journal entries written before the snapshot is rewritten
pub const DEFAULT_JOURNAL_LIMIT: usize = 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    /// Last journal sequence folded into this snapshot
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    orders: Vec<Record>,
}

/// One line of the journal
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry<R> {
    seq: u64,
    record: R,
}

#[derive(Debug, Default)]
struct JournalState {
    seq: u64,
    entries: usize,
}

/// JSON-file store over a memory store.
///
/// Single upserts are appended to a line journal next to the snapshot; batch
/// writes, account changes and a full journal rewrite the snapshot. Journal
/// lines at or below the snapshot's sequence are ignored on load.
pub struct FileStore {
    path: PathBuf,
    journal_path: PathBuf,
    journal_limit: usize,
    inner: MemoryStore,
    state: Mutex<JournalState>,
}

impl FileStore {
    /// Open `path`, loading the snapshot and replaying its journal
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let journal_path = path.with_extension("journal");
        let inner = MemoryStore::new();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store snapshot at {}, starting empty", path.display());
                Snapshot::default()
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            "Loaded {} accounts and {} records from {}",
            snapshot.accounts.len(),
            snapshot.orders.len(),
            path.display()
        );
        let mut state = JournalState {
            seq: snapshot.seq,
            entries: 0,
        };
        for account in snapshot.accounts {
            inner.put_account(account);
        }
        for record in snapshot.orders {
            inner.put_record(record);
        }

        match tokio::fs::read_to_string(&journal_path).await {
            Ok(journal) => {
                for line in journal.lines().filter(|l| !l.trim().is_empty()) {
                    let entry: JournalEntry<Record> = match serde_json::from_str(line) {
                        Ok(entry) => entry,
                        Err(e) => {
                            // Only the last line can be torn by a crash mid-append
                            warn!("Ignoring unreadable journal tail in {}: {}", journal_path.display(), e);
                            break;
                        }
                    };
                    if entry.seq <= snapshot.seq {
                        continue;
                    }
                    inner.put_record(entry.record);
                    state.seq = state.seq.max(entry.seq);
                    state.entries += 1;
                }
                if state.entries > 0 {
                    info!("Replayed {} journaled records from {}", state.entries, journal_path.display());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            journal_path,
            journal_limit: DEFAULT_JOURNAL_LIMIT,
            inner,
            state: Mutex::new(state),
        })
    }

    /// Rewrite the snapshot after `limit` journaled upserts
    pub fn with_journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = limit.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn record_count(&self) -> usize {
        self.inner.record_count()
    }

    async fn append(&self, state: &mut JournalState, record: &Record) -> Result<(), StoreError> {
        let entry = JournalEntry {
            seq: state.seq + 1,
            record,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        state.seq += 1;
        state.entries += 1;
        if state.entries >= self.journal_limit {
            self.compact(state).await?;
        }
        Ok(())
    }

    /// Write the snapshot to a temp file, rename it over the old one and
    /// start an empty journal
    async fn compact(&self, state: &mut JournalState) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            seq: state.seq,
            accounts: self.inner.all_accounts(),
            orders: self.inner.all_records(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        match tokio::fs::remove_file(&self.journal_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Compacted {} journal entries into {}", state.entries, self.path.display());
        state.entries = 0;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn upsert(&self, record: Record) -> Result<UpsertSummary, StoreError> {
        let mut state = self.state.lock().await;
        let summary = self.inner.put_record(record.clone());
        self.append(&mut state, &record).await?;
        Ok(summary)
    }

    async fn upsert_many(&self, records: Vec<Record>) -> Result<UpsertSummary, StoreError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }
        let mut state = self.state.lock().await;
        let summary = self.inner.upsert_many(records).await?;
        self.compact(&mut state).await?;
        Ok(summary)
    }

    async fn latest(
        &self,
        account_id: &AccountId,
        exchange: &str,
        market: &str,
    ) -> Result<Option<Record>, StoreError> {
        self.inner.latest(account_id, exchange, market).await
    }

    async fn records_for_account(&self, account_id: &AccountId) -> Result<Vec<Record>, StoreError> {
        self.inner.records_for_account(account_id).await
    }
}

#[async_trait]
impl AccountStore for FileStore {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.inner.list_accounts().await
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.get_account(account_id).await
    }

    async fn save_account(&self, account: Account) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.inner.put_account(account);
        self.compact(&mut state).await
    }
}

/// Read a JSON array of accounts, as exported by the registration tooling
pub async fn load_accounts_file(path: impl AsRef<Path>) -> Result<Vec<Account>, StoreError> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
