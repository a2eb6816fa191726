use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use trade_sync::{AccountId, FileStore, MemoryStore, Record, RecordStore};

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn fill(id: &str, account: AccountId, millis: i64) -> Record {
    Record::new(id, account, "binance", "spot", at(millis))
}

async fn assert_idempotent(store: &dyn RecordStore) {
    let account = AccountId::new();
    let batch = vec![fill("1", account, 1_000), fill("2", account, 2_000)];

    let first = store.upsert_many(batch.clone()).await.unwrap();
    assert_eq!(first.inserted, 2);

    let second = store.upsert_many(batch).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    assert_eq!(store.records_for_account(&account).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_memory_store_upsert_is_idempotent() {
    assert_idempotent(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_file_store_upsert_is_idempotent() {
    let path = std::env::temp_dir()
        .join(format!("trade_sync_it_{}", uuid::Uuid::new_v4().simple()))
        .join("store.json");
    let store = FileStore::open(&path).await.unwrap();
    assert_idempotent(&store).await;
}

#[tokio::test]
async fn test_last_write_wins() {
    let store = MemoryStore::new();
    let account = AccountId::new();

    let mut partial = fill("7", account, 1_000);
    partial.status = "PARTIALLY_FILLED".to_string();
    partial.executed_quantity = Decimal::new(5, 1);
    store.upsert(partial).await.unwrap();

    let mut filled = fill("7", account, 1_500);
    filled.status = "FILLED".to_string();
    filled.executed_quantity = Decimal::ONE;
    store.upsert(filled).await.unwrap();

    let records = store.records_for_account(&account).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "FILLED");
    assert_eq!(records[0].executed_quantity, Decimal::ONE);
}

#[tokio::test]
async fn test_cursor_never_moves_backwards() {
    let store = MemoryStore::new();
    let account = AccountId::new();

    store
        .upsert_many(vec![fill("1", account, 1_000), fill("3", account, 3_000)])
        .await
        .unwrap();
    let cursor = store.latest(&account, "binance", "spot").await.unwrap().unwrap();
    assert_eq!(cursor.time, at(3_000));

    // An older fill arriving late does not rewind the cursor
    store.upsert(fill("2", account, 2_000)).await.unwrap();
    let cursor = store.latest(&account, "binance", "spot").await.unwrap().unwrap();
    assert_eq!(cursor.time, at(3_000));

    // Other markets keep their own cursor
    assert!(store.latest(&account, "binance", "futures").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_writers_do_not_lose_records() {
    let store = Arc::new(MemoryStore::new());
    let account = AccountId::new();

    let writers: Vec<_> = (0..10)
        .map(|w| {
            let store = store.clone();
            tokio::spawn(async move {
                let batch = (0..20)
                    .map(|i| fill(&format!("{}-{}", w, i), account, 1_000 + i))
                    .collect();
                store.upsert_many(batch).await.unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(store.records_for_account(&account).await.unwrap().len(), 200);
}
