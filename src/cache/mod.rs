pub mod client_cache;

pub use client_cache::{
    client_key, ClientCache, ClientSet, DEFAULT_CLIENT_TTL, DEFAULT_SWEEP_INTERVAL,
};
