//! Runtime configuration: compiled defaults with env-var overrides.

use std::env;

/// Websocket listen address for clients.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:6379";

/// Address of the surrealdb instance holding the league state.
pub const DEFAULT_DB_ADDR: &str = "127.0.0.1:8000";

/// Points granted to a freshly registered user.
pub const DEFAULT_STARTING_BALANCE: u64 = 1000;

/// Smallest stake a wager may carry.
pub const DEFAULT_MIN_STAKE: u64 = 1;

pub fn bind_addr() -> String {
    env::var("GUIMABET_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
}

pub fn db_addr() -> String {
    env::var("GUIMABET_DB_ADDR").unwrap_or_else(|_| DEFAULT_DB_ADDR.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Knobs the store itself needs on every request.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub starting_balance: u64,
    pub min_stake: u64,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            starting_balance: env_u64("GUIMABET_STARTING_BALANCE", DEFAULT_STARTING_BALANCE),
            min_stake: env_u64("GUIMABET_MIN_STAKE", DEFAULT_MIN_STAKE),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            min_stake: DEFAULT_MIN_STAKE,
        }
    }
}
