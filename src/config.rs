//! Configuration from environment variables.
//!
//! A `.env` file in the working directory is loaded first if present.
//! Command-line flags override whatever is read here.

use std::env;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "localfit.db";
const DEFAULT_POOL_SIZE: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database file (`LOCALFIT_DB`)
    pub db_path: PathBuf,
    /// Connections kept in the pool (`LOCALFIT_POOL_SIZE`)
    pub pool_size: u32,
    /// How long a writer waits on a locked database (`LOCALFIT_BUSY_TIMEOUT_MS`)
    pub busy_timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            db_path: lookup("LOCALFIT_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            pool_size: parse_var(&lookup, "LOCALFIT_POOL_SIZE")?.unwrap_or(defaults.pool_size),
            busy_timeout_ms: parse_var(&lookup, "LOCALFIT_BUSY_TIMEOUT_MS")?
                .unwrap_or(defaults.busy_timeout_ms),
        })
    }
}

fn parse_var<F>(lookup: &F, key: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid { key, value: raw }),
            Ok(v) => Ok(Some(v)),
        },
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' (expected a positive integer)")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.db_path, PathBuf::from("localfit.db"));
    }

    #[test]
    fn test_values_from_vars() {
        let config = Config::from_lookup(lookup(&[
            ("LOCALFIT_DB", "/tmp/fit.db"),
            ("LOCALFIT_POOL_SIZE", "2"),
            ("LOCALFIT_BUSY_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/fit.db"));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.busy_timeout_ms, 250);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Config::from_lookup(lookup(&[("LOCALFIT_POOL_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("LOCALFIT_POOL_SIZE"));

        assert!(Config::from_lookup(lookup(&[("LOCALFIT_POOL_SIZE", "0")])).is_err());
    }
}
