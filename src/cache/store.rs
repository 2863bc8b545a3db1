//! Cache store with transparent in-process fallback.
//!
//! All backend failures are absorbed here: reads and writes degrade to an
//! in-process map with identical TTL semantics, and a write failure is logged
//! and swallowed so it can never abort a caller's response path.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::backend::{CacheBackend, CacheEntry, MemoryBackend, SqliteBackend};

/// Best-effort cache store over a shared backend.
#[derive(Clone)]
pub struct CacheStore {
  primary: Option<Arc<dyn CacheBackend>>,
  fallback: Arc<MemoryBackend>,
}

impl CacheStore {
  /// Open the store over the shared SQLite cache database.
  ///
  /// If the database cannot be opened the store still comes up, serving from
  /// the in-process fallback only; the degradation is invisible to callers.
  pub fn open(path: &Path) -> Self {
    let primary: Option<Arc<dyn CacheBackend>> = match SqliteBackend::open(path) {
      Ok(backend) => Some(Arc::new(backend)),
      Err(e) => {
        warn!("Cache backend unavailable, using in-process fallback: {}", e);
        None
      }
    };

    Self {
      primary,
      fallback: Arc::new(MemoryBackend::new()),
    }
  }

  /// A store with no shared backend at all (tests, ephemeral tooling).
  pub fn in_process() -> Self {
    Self {
      primary: None,
      fallback: Arc::new(MemoryBackend::new()),
    }
  }

  /// A store over an explicit backend (tests inject an in-memory SQLite one).
  pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
    Self {
      primary: Some(backend),
      fallback: Arc::new(MemoryBackend::new()),
    }
  }

  /// Get an entry, fresh or stale. Backend errors read as a miss on the
  /// primary and fall through to the in-process map.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    if let Some(primary) = &self.primary {
      match primary.get(key) {
        Ok(Some(entry)) => return Some(entry),
        Ok(None) => {}
        Err(e) => warn!(key, "Cache read failed, trying fallback: {}", e),
      }
    }
    self.fallback.get(key).unwrap_or_default()
  }

  /// The revalidation token of an entry, if one is stored.
  pub fn get_token(&self, key: &str) -> Option<String> {
    self.get(key).and_then(|e| e.token)
  }

  /// Store a payload under `key`. Best-effort: failures are logged and the
  /// entry is kept in the in-process fallback instead.
  pub fn set(
    &self,
    key: &str,
    payload: serde_json::Value,
    ttl_seconds: i64,
    token: Option<String>,
  ) {
    let entry = CacheEntry {
      key: key.to_string(),
      payload,
      stored_at: Utc::now(),
      ttl_seconds,
      token,
    };

    if let Some(primary) = &self.primary {
      match primary.put(&entry) {
        Ok(()) => {
          // Drop any fallback shadow so reads prefer the durable copy.
          let _ = self.fallback.delete(key);
          return;
        }
        Err(e) => warn!(key, "Cache write failed, keeping in-process copy: {}", e),
      }
    }
    if let Err(e) = self.fallback.put(&entry) {
      warn!(key, "In-process cache write failed: {}", e);
    }
  }

  /// Extend an entry's TTL window without touching payload or token.
  /// Returns false when the key is absent everywhere.
  pub fn touch(&self, key: &str) -> bool {
    let now = Utc::now();
    if let Some(primary) = &self.primary {
      match primary.touch(key, now) {
        Ok(true) => return true,
        Ok(false) => {}
        Err(e) => warn!(key, "Cache touch failed: {}", e),
      }
    }
    self.fallback.touch(key, now).unwrap_or(false)
  }

  pub fn delete(&self, key: &str) {
    if let Some(primary) = &self.primary {
      if let Err(e) = primary.delete(key) {
        warn!(key, "Cache delete failed: {}", e);
      }
    }
    if let Err(e) = self.fallback.delete(key) {
      warn!(key, "In-process cache delete failed: {}", e);
    }
  }

  /// Delete every entry whose key starts with `prefix`, returning the count
  /// of entries removed from whichever backends were reachable.
  pub fn delete_by_prefix(&self, prefix: &str) -> u64 {
    let mut deleted = 0;
    if let Some(primary) = &self.primary {
      match primary.delete_by_prefix(prefix) {
        Ok(n) => deleted += n,
        Err(e) => warn!(prefix, "Cache prefix delete failed: {}", e),
      }
    }
    deleted + self.fallback.delete_by_prefix(prefix).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  /// Backend that fails every operation, to exercise fallback degradation.
  struct BrokenBackend;

  impl CacheBackend for BrokenBackend {
    fn get(&self, _key: &str) -> color_eyre::Result<Option<CacheEntry>> {
      Err(eyre!("backend down"))
    }
    fn put(&self, _entry: &CacheEntry) -> color_eyre::Result<()> {
      Err(eyre!("backend down"))
    }
    fn touch(&self, _key: &str, _now: chrono::DateTime<Utc>) -> color_eyre::Result<bool> {
      Err(eyre!("backend down"))
    }
    fn delete(&self, _key: &str) -> color_eyre::Result<()> {
      Err(eyre!("backend down"))
    }
    fn delete_by_prefix(&self, _prefix: &str) -> color_eyre::Result<u64> {
      Err(eyre!("backend down"))
    }
  }

  #[test]
  fn test_round_trip_through_primary() {
    let store = CacheStore::with_backend(Arc::new(SqliteBackend::open_in_memory().unwrap()));
    store.set("k", serde_json::json!({"n": 1}), 60, Some("t1".into()));

    let entry = store.get("k").expect("entry present");
    assert_eq!(entry.payload, serde_json::json!({"n": 1}));
    assert!(entry.is_fresh(Utc::now()));
    assert_eq!(store.get_token("k").as_deref(), Some("t1"));
  }

  #[test]
  fn test_backend_failure_degrades_to_in_process_map() {
    let store = CacheStore::with_backend(Arc::new(BrokenBackend));

    // Same contract as a healthy store; never an error to the caller.
    store.set("k", serde_json::json!(7), 60, None);
    let entry = store.get("k").expect("served from fallback");
    assert_eq!(entry.payload, serde_json::json!(7));

    assert!(store.touch("k"));
    store.delete("k");
    assert!(store.get("k").is_none());
  }

  #[test]
  fn test_delete_by_prefix_spans_backends() {
    let store = CacheStore::in_process();
    store.set("issues:r:today", serde_json::json!(1), 60, None);
    store.set("issues:r:this-week", serde_json::json!(2), 60, None);
    store.set("commits:r:today", serde_json::json!(3), 60, None);

    assert_eq!(store.delete_by_prefix("issues:r:"), 2);
    assert!(store.get("commits:r:today").is_some());
  }
}
