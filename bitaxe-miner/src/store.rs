//! Persistent settings.
//!
//! Settings are a flat map of string keys to JSON scalars. Typed getters
//! never fail: a missing key or a value of the wrong type yields the
//! caller's default, the same as on a freshly flashed device.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tracing::prelude::*;

pub mod keys {
    pub const POOL_URL: &str = "stratumurl";
    pub const POOL_PORT: &str = "stratumport";
    pub const FALLBACK_POOL_URL: &str = "fbstratumurl";
    pub const FALLBACK_POOL_PORT: &str = "fbstratumport";
    pub const POOL_USER: &str = "stratumuser";
    pub const POOL_PASS: &str = "stratumpass";
    pub const ASIC_FREQUENCY: &str = "asicfrequency";
    pub const BEST_DIFF: &str = "best-diff";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("store file {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    fn set_string(&self, key: &str, value: &str) -> StoreResult<()> {
        self.set(key, Value::String(value.to_string()))
    }

    fn set_u64(&self, key: &str, value: u64) -> StoreResult<()> {
        self.set(key, Value::from(value))
    }

    fn set_f64(&self, key: &str, value: f64) -> StoreResult<()> {
        self.set(key, Value::from(value))
    }
}

/// Store that forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object on disk.
///
/// Every `set` rewrites the whole file: the new contents go to a sibling
/// temporary file which is then renamed over the old one, so a crash
/// leaves either the old or the new settings, never a torn file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Map::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Map<String, Value>) -> StoreResult<()> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let contents = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut file = fs::File::create(&tmp).map_err(io_error)?;
        file.write_all(&contents).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        fs::rename(&tmp, &self.path).map_err(io_error)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }
}
