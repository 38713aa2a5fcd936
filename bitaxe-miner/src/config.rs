//! Daemon configuration.
//!
//! Values come from the settings store, with `BITAXE_*` environment
//! variables taking precedence. The store path itself can only be set from
//! the environment.
//!
//! # Environment Variables
//!
//! - `BITAXE_POOL_URL`, `BITAXE_POOL_PORT`: primary pool
//! - `BITAXE_FALLBACK_POOL_URL`, `BITAXE_FALLBACK_POOL_PORT`: fallback pool
//! - `BITAXE_POOL_USER`, `BITAXE_POOL_PASS`: worker credentials
//! - `BITAXE_SERIAL`: serial device the chain hangs off
//! - `BITAXE_FREQUENCY`: hash clock in MHz
//! - `BITAXE_SUGGESTED_DIFFICULTY`: difficulty asked of the pool at connect
//! - `BITAXE_STORE`: settings file

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::store::{KeyValueStore, keys};
use crate::types::Frequency;

pub const DEFAULT_POOL_URL: &str = "public-pool.io";
pub const DEFAULT_POOL_PORT: u16 = 21496;
pub const DEFAULT_POOL_USER: &str = "bc1q...bitaxe";
pub const DEFAULT_POOL_PASS: &str = "x";
pub const DEFAULT_SERIAL: &str = "/dev/ttyACM1";
pub const DEFAULT_FREQUENCY_MHZ: f32 = 485.0;
pub const DEFAULT_SUGGESTED_DIFFICULTY: u64 = 1000;
pub const DEFAULT_STORE_PATH: &str = "/var/lib/bitaxe/config.json";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub url: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub pool: PoolConfig,
    pub fallback_pool: Option<PoolConfig>,
    pub username: String,
    pub password: String,
    pub serial_path: PathBuf,
    pub frequency: Frequency,
    pub suggested_difficulty: u64,
}

impl Config {
    /// Reads the process environment over `store`.
    pub fn from_env(store: &dyn KeyValueStore) -> ConfigResult<Self> {
        Self::resolve(store, |var| std::env::var(var).ok())
    }

    /// Where the settings store lives.
    pub fn store_path() -> PathBuf {
        std::env::var_os("BITAXE_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    /// Builds the configuration, asking `env` before `store`.
    pub fn resolve(
        store: &dyn KeyValueStore,
        env: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let string = |var: &'static str, key: &str, default: &str| {
            env(var).unwrap_or_else(|| store.get_string(key, default))
        };

        let pool = PoolConfig {
            url: string("BITAXE_POOL_URL", keys::POOL_URL, DEFAULT_POOL_URL),
            port: parsed(&env, "BITAXE_POOL_PORT", "port number")?
                .unwrap_or_else(|| port_from_store(store, keys::POOL_PORT, DEFAULT_POOL_PORT)),
        };

        let fallback_url = string("BITAXE_FALLBACK_POOL_URL", keys::FALLBACK_POOL_URL, "");
        let fallback_port = parsed(&env, "BITAXE_FALLBACK_POOL_PORT", "port number")?
            .unwrap_or_else(|| port_from_store(store, keys::FALLBACK_POOL_PORT, pool.port));
        let fallback_pool = (!fallback_url.is_empty()).then_some(PoolConfig {
            url: fallback_url,
            port: fallback_port,
        });

        let frequency_mhz = parsed(&env, "BITAXE_FREQUENCY", "frequency in MHz")?
            .unwrap_or_else(|| {
                store.get_f64(keys::ASIC_FREQUENCY, f64::from(DEFAULT_FREQUENCY_MHZ)) as f32
            });

        Ok(Config {
            pool,
            fallback_pool,
            username: string("BITAXE_POOL_USER", keys::POOL_USER, DEFAULT_POOL_USER),
            password: string("BITAXE_POOL_PASS", keys::POOL_PASS, DEFAULT_POOL_PASS),
            serial_path: PathBuf::from(
                env("BITAXE_SERIAL").unwrap_or_else(|| DEFAULT_SERIAL.to_string()),
            ),
            frequency: Frequency::from_mhz(frequency_mhz),
            suggested_difficulty: parsed(&env, "BITAXE_SUGGESTED_DIFFICULTY", "difficulty")?
                .unwrap_or(DEFAULT_SUGGESTED_DIFFICULTY),
        })
    }
}

fn parsed<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> ConfigResult<Option<T>> {
    env(var)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            })
        })
        .transpose()
}

fn port_from_store(store: &dyn KeyValueStore, key: &str, default: u16) -> u16 {
    u16::try_from(store.get_u64(key, u64::from(default))).unwrap_or(default)
}
