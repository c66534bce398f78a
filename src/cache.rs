// ⏱️ TTL Cache - memoizes service results per distinct parameter set
//
// Constructed once at startup and shared by handle (Arc). The map is behind a
// single mutex; the computation itself runs outside the lock, so two callers
// with the same key may both compute and the last write wins.
// Expiry is checked lazily on read, and every write sweeps expired entries;
// there is no eviction thread.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache {
    enabled: bool,
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for TtlCache {
    fn default() -> Self {
        TtlCache::new(true, DEFAULT_TTL)
    }
}

/// Deterministic key: sha256 over prefix, function identity and the JSON of
/// the ordered argument list. `None` when the arguments do not serialize.
pub fn cache_key<A: Serialize + ?Sized>(prefix: &str, function: &str, args: &A) -> Option<String> {
    let args_json = match serde_json::to_string(args) {
        Ok(json) => json,
        Err(e) => {
            warn!(prefix, function, error = %e, "cache arguments not serializable");
            return None;
        }
    };
    let mut hasher = Sha256::new();
    hasher.update(function.as_bytes());
    hasher.update(b":");
    hasher.update(args_json.as_bytes());
    Some(format!("{}{:x}", prefix, hasher.finalize()))
}

impl TtlCache {
    pub fn new(enabled: bool, default_ttl: Duration) -> Self {
        TtlCache {
            enabled,
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // Poisoned map is still a valid map
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Value for `key` if present and not yet expired
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key, "cache expired");
                None
            }
            None => {
                debug!(key, "cache miss");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();
        let mut entries = self.lock();

        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "expired cache entries dropped");
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        debug!(key, ttl_secs = ttl.as_secs_f64(), "cache set");
    }

    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "cache cleared");
    }

    /// Live and expired-but-unread entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memoize `compute` under (prefix, function, args).
    ///
    /// Errors are never cached. A stored value that no longer decodes as `T`
    /// is logged and treated as a miss.
    pub fn cached<T, A, F>(
        &self,
        prefix: &str,
        function: &str,
        args: &A,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize + ?Sized,
        F: FnOnce() -> Result<T>,
    {
        if !self.enabled {
            return compute();
        }

        let key = match cache_key(prefix, function, args) {
            Some(key) => key,
            None => return compute(),
        };
        if let Some(hit) = self.get(&key) {
            match serde_json::from_value::<T>(hit) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(key = %key, error = %e, "cached value did not decode, recomputing"),
            }
        }

        let value = compute()?;
        match serde_json::to_value(&value) {
            Ok(json) => self.set(&key, json, ttl),
            Err(e) => warn!(key = %key, error = %e, "result not cacheable"),
        }
        Ok(value)
    }
}
