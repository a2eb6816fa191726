pub mod file;
pub mod memory;

pub use file::{load_accounts_file, FileStore};
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{Account, AccountId, Record};
use async_trait::async_trait;
use std::ops::AddAssign;

/// Outcome of an upsert batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl AddAssign for UpsertSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// The `orders` collection: unique on `RecordKey`, last write wins
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert(&self, record: Record) -> Result<UpsertSummary, StoreError>;

    /// Unordered bulk upsert; safe to call from concurrent writers
    async fn upsert_many(&self, records: Vec<Record>) -> Result<UpsertSummary, StoreError>;

    /// Newest record of (account, exchange, market) by `time`, the sync cursor
    async fn latest(
        &self,
        account_id: &AccountId,
        exchange: &str,
        market: &str,
    ) -> Result<Option<Record>, StoreError>;

    /// All records of an account, oldest first
    async fn records_for_account(&self, account_id: &AccountId) -> Result<Vec<Record>, StoreError>;
}

/// The `accounts` collection
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError>;

    async fn save_account(&self, account: Account) -> Result<(), StoreError>;
}
