use log::{error, info, warn};
use std::sync::Arc;
use trade_sync::{
    init_logging, store::load_accounts_file, AccountStore, AdapterRegistry, AesGcmCipher,
    CancellationSignal, ClientCache, FileStore, StreamOrchestrator, SyncConfig, TradeSyncService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::from_env()?;
    init_logging(&config.log_level, config.log_file.as_deref())?;
    info!("Starting trade sync");

    let cipher = Arc::new(AesGcmCipher::from_env()?);
    let store = Arc::new(FileStore::open(&config.store_path).await?);

    if let Some(path) = &config.accounts_path {
        let accounts = load_accounts_file(path).await?;
        info!("Importing {} accounts from {}", accounts.len(), path.display());
        for account in accounts {
            store.save_account(account).await?;
        }
    }

    let cache = Arc::new(ClientCache::with_ttl(
        AdapterRegistry::with_defaults(),
        cipher.clone(),
        config.client_ttl,
    ));
    cache.start_sweeper(config.sweep_interval);

    let sync = Arc::new(
        TradeSyncService::new(store.clone(), store.clone(), cache.clone())
            .with_pool_sizes(config.account_pool_size, config.client_pool_size),
    );
    let orchestrator = Arc::new(
        StreamOrchestrator::new(store.clone(), store.clone(), cache.clone(), cipher)
            .with_policy(config.reconnect.clone())
            .with_pool_size(config.stream_pool_size),
    );

    let cancel = CancellationSignal::new();

    // First tick fires immediately
    let scheduler = {
        let sync = sync.clone();
        let cancel = cancel.clone();
        let period = config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sync.sync_all(&cancel).await {
                            error!("Trade history sync failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    };

    let startup = orchestrator.start_all();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cancel.cancel();
    startup.abort();
    if let Err(e) = scheduler.await {
        warn!("Sync scheduler ended abnormally: {}", e);
    }
    orchestrator.stop_all().await;
    cache.shutdown().await;

    info!("Trade sync stopped");
    Ok(())
}
