use crate::streaming::ReconnectPolicy;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted interval, TTL or reconnect delay
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Invalid or inconsistent configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Runtime settings for the sync service, streaming orchestrator and binary
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub sync_interval: Duration,
    pub account_pool_size: usize,
    pub client_pool_size: usize,
    pub stream_pool_size: usize,
    pub client_ttl: Duration,
    pub sweep_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
    pub log_file: Option<String>,
    pub store_path: PathBuf,
    pub accounts_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30 * 60),
            account_pool_size: 5,
            client_pool_size: 3,
            stream_pool_size: 3,
            client_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            reconnect: ReconnectPolicy::default(),
            log_level: "info".to_string(),
            log_file: None,
            store_path: PathBuf::from("data/trade_sync.json"),
            accounts_path: None,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TRADE_HISTORY_CRON_MINUTES") {
            config.sync_interval = duration("TRADE_HISTORY_CRON_MINUTES", &v, 60)?;
        }
        if let Some(v) = get("ACCOUNT_POOL_SIZE") {
            config.account_pool_size = parse("ACCOUNT_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("CLIENT_POOL_SIZE") {
            config.client_pool_size = parse("CLIENT_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("STREAM_POOL_SIZE") {
            config.stream_pool_size = parse("STREAM_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("CLIENT_CACHE_TTL_HOURS") {
            config.client_ttl = duration("CLIENT_CACHE_TTL_HOURS", &v, 3600)?;
        }
        if let Some(v) = get("CLIENT_CACHE_SWEEP_MINUTES") {
            config.sweep_interval = duration("CLIENT_CACHE_SWEEP_MINUTES", &v, 60)?;
        }
        if let Some(v) = get("STREAM_RECONNECT_SECONDS") {
            config.reconnect = ReconnectPolicy::fixed(duration("STREAM_RECONNECT_SECONDS", &v, 1)?);
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v.trim().to_lowercase();
        }
        config.log_file = get("LOG_FILE");
        if let Some(v) = get("STORE_PATH") {
            config.store_path = PathBuf::from(v);
        }
        config.accounts_path = get("ACCOUNTS_PATH").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ACCOUNT_POOL_SIZE", self.account_pool_size),
            ("CLIENT_POOL_SIZE", self.client_pool_size),
            ("STREAM_POOL_SIZE", self.stream_pool_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be at least 1"));
            }
        }
        if self.sync_interval.is_zero() {
            return Err(invalid("TRADE_HISTORY_CRON_MINUTES", "must be at least 1"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("CLIENT_CACHE_SWEEP_MINUTES", "must be at least 1"));
        }
        if self.client_ttl.is_zero() {
            return Err(invalid("CLIENT_CACHE_TTL_HOURS", "must be at least 1"));
        }
        if !matches!(
            self.log_level.as_str(),
            "off" | "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(invalid("LOG_LEVEL", &format!("unknown level '{}'", self.log_level)));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, &format!("'{}': {}", value, e)))
}

/// `value` counted in units of `unit_secs` seconds
fn duration(key: &str, value: &str, unit_secs: u64) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .filter(|d| *d <= MAX_DURATION)
        .ok_or_else(|| invalid(key, &format!("'{}' is longer than {} days", value, MAX_DURATION.as_secs() / 86_400)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.sync_interval, Duration::from_secs(1800));
        assert_eq!(config.account_pool_size, 5);
        assert_eq!(config.client_pool_size, 3);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TRADE_HISTORY_CRON_MINUTES", "5"),
            ("ACCOUNT_POOL_SIZE", "8"),
            ("STREAM_RECONNECT_SECONDS", "2"),
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FILE", "sync.log"),
            ("ACCOUNTS_PATH", "accounts.json"),
        ]))
        .unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.account_pool_size, 8);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_file.as_deref(), Some("sync.log"));
        assert_eq!(config.accounts_path, Some(PathBuf::from("accounts.json")));
    }

    #[test]
    fn test_invalid_values() {
        let err = SyncConfig::from_lookup(lookup(&[("CLIENT_POOL_SIZE", "three")])).unwrap_err();
        assert_eq!(err.key, "CLIENT_POOL_SIZE");

        let err = SyncConfig::from_lookup(lookup(&[("ACCOUNT_POOL_SIZE", "0")])).unwrap_err();
        assert_eq!(err.key, "ACCOUNT_POOL_SIZE");

        let err = SyncConfig::from_lookup(lookup(&[("LOG_LEVEL", "loud")])).unwrap_err();
        assert_eq!(err.key, "LOG_LEVEL");
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("CLIENT_CACHE_TTL_HOURS", "18446744073709551615")])).unwrap_err();
        assert_eq!(err.key, "CLIENT_CACHE_TTL_HOURS");

        let err = SyncConfig::from_lookup(lookup(&[("TRADE_HISTORY_CRON_MINUTES", "9999999999999999")])).unwrap_err();
        assert_eq!(err.key, "TRADE_HISTORY_CRON_MINUTES");

        let err = SyncConfig::from_lookup(lookup(&[("STREAM_RECONNECT_SECONDS", "40000000")])).unwrap_err();
        assert_eq!(err.key, "STREAM_RECONNECT_SECONDS");

        let config = SyncConfig::from_lookup(lookup(&[("CLIENT_CACHE_TTL_HOURS", "8760")])).unwrap();
        assert_eq!(config.client_ttl, Duration::from_secs(8760 * 3600));
    }
}
