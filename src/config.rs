// Process configuration, read from the environment (and an optional .env file)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DATABASE_PATH_ENV: &str = "LEDGER_DATABASE_PATH";
pub const UPLOAD_DIR_ENV: &str = "LEDGER_UPLOAD_DIR";
pub const BIND_ADDR_ENV: &str = "LEDGER_BIND_ADDR";

const DEFAULT_DATABASE_PATH: &str = "ledger.db";
const DEFAULT_UPLOAD_DIR: &str = "tmp";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3333";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Where uploads are staged before import (files are removed after import)
    pub upload_dir: PathBuf,

    /// Listen address for the API server
    pub bind_addr: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load `.env` if present, then read `LEDGER_*` variables over the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LedgerConfig::default();

        LedgerConfig {
            database_path: get_or(&lookup, DATABASE_PATH_ENV, defaults.database_path),
            upload_dir: get_or(&lookup, UPLOAD_DIR_ENV, defaults.upload_dir),
            bind_addr: get_or(&lookup, BIND_ADDR_ENV, defaults.bind_addr),
        }
    }
}

fn get_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparsable configuration value, using default");
                default
            }
        },
        None => default,
    }
}
