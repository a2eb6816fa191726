use crate::error::StoreError;
use crate::models::{Account, AccountId, Record, RecordKey};
use crate::store::{AccountStore, RecordStore, UpsertSummary};
use async_trait::async_trait;
use dashmap::DashMap;

/// In-process store backed by concurrent maps
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<RecordKey, Record>,
    accounts: DashMap<AccountId, Account>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        self.records.get(key).map(|r| r.clone())
    }

    pub(crate) fn put_record(&self, record: Record) -> UpsertSummary {
        match self.records.insert(record.key(), record) {
            Some(_) => UpsertSummary {
                inserted: 0,
                updated: 1,
            },
            None => UpsertSummary {
                inserted: 1,
                updated: 0,
            },
        }
    }

    pub(crate) fn put_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub(crate) fn all_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub(crate) fn all_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        accounts
    }

    fn latest_record(&self, account_id: &AccountId, exchange: &str, market: &str) -> Option<Record> {
        self.records
            .iter()
            .filter(|r| {
                r.account_id == *account_id && r.exchange == exchange && r.market == market
            })
            .max_by_key(|r| r.time)
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, record: Record) -> Result<UpsertSummary, StoreError> {
        Ok(self.put_record(record))
    }

    async fn upsert_many(&self, records: Vec<Record>) -> Result<UpsertSummary, StoreError> {
        let mut summary = UpsertSummary::default();
        for record in records {
            summary += self.put_record(record);
        }
        Ok(summary)
    }

    async fn latest(
        &self,
        account_id: &AccountId,
        exchange: &str,
        market: &str,
    ) -> Result<Option<Record>, StoreError> {
        Ok(self.latest_record(account_id, exchange, market))
    }

    async fn records_for_account(&self, account_id: &AccountId) -> Result<Vec<Record>, StoreError> {
        let mut records: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.account_id == *account_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.all_accounts())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(account_id).map(|a| a.clone()))
    }

    async fn save_account(&self, account: Account) -> Result<(), StoreError> {
        self.put_account(account);
        Ok(())
    }
}
