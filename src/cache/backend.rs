//! Cache backend trait and its SQLite / in-process implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// A single cached value with its freshness and revalidation metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub payload: serde_json::Value,
  pub stored_at: DateTime<Utc>,
  pub ttl_seconds: i64,
  /// Opaque revalidation token (ETag) from the response that produced the
  /// payload. May be used to avoid a payload re-fetch even after expiry.
  pub token: Option<String>,
}

impl CacheEntry {
  /// Whether the payload may still be trusted without revalidation.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    (now - self.stored_at).num_seconds() < self.ttl_seconds
  }
}

/// Trait for cache storage backends.
pub trait CacheBackend: Send + Sync {
  /// Get an entry by key, fresh or not.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Reset an entry's stored-at instant, extending its TTL window without
  /// touching payload or token. Returns false if the key is absent.
  fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

  /// Remove an entry. Removing an absent key is not an error.
  fn delete(&self, key: &str) -> Result<()>;

  /// Remove every entry whose key starts with `prefix`. Returns the count.
  fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;
}

/// In-process fallback backend, also the test backend.
///
/// Same TTL semantics as the SQLite backend, but entries do not survive the
/// process.
#[derive(Default)]
pub struct MemoryBackend {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for MemoryBackend {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    self.lock()?.insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut entries = self.lock()?;
    match entries.get_mut(key) {
      Some(entry) => {
        entry.stored_at = now;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|k, _| !k.starts_with(prefix));
    Ok((before - entries.len()) as u64)
  }
}

/// Schema for the shared cache database.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    ttl_seconds INTEGER NOT NULL,
    token TEXT
);
"#;

/// SQLite-backed cache storage shared between processes.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open (or create) the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Open a private in-memory database (used by tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;
    Ok(backend)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for SqliteBackend {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT payload, stored_at, ttl_seconds, token FROM cache_entries WHERE key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, i64, Option<String>)> = stmt
      .query_row(params![key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((payload, stored_at, ttl_seconds, token)) => {
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize cache payload: {}", e))?;
        let stored_at = parse_datetime(&stored_at)?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          payload,
          stored_at,
          ttl_seconds,
          token,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let payload = serde_json::to_string(&entry.payload)
      .map_err(|e| eyre!("Failed to serialize cache payload: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, payload, stored_at, ttl_seconds, token)
         VALUES (?, ?, ?, ?, ?)",
        params![
          entry.key,
          payload,
          entry.stored_at.to_rfc3339(),
          entry.ttl_seconds,
          entry.token
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
    let conn = self.lock()?;
    let changed = conn
      .execute(
        "UPDATE cache_entries SET stored_at = ? WHERE key = ?",
        params![now.to_rfc3339(), key],
      )
      .map_err(|e| eyre!("Failed to touch cache entry: {}", e))?;
    Ok(changed > 0)
  }

  fn delete(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_entries WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(())
  }

  fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
    let conn = self.lock()?;
    let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE key LIKE ? ESCAPE '\\'",
        params![pattern],
      )
      .map_err(|e| eyre!("Failed to delete cache entries by prefix: {}", e))?;
    Ok(deleted as u64)
  }
}

/// Parse an RFC 3339 datetime stored by `put`/`touch`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &str, payload: serde_json::Value, ttl: i64) -> CacheEntry {
    CacheEntry {
      key: key.to_string(),
      payload,
      stored_at: Utc::now(),
      ttl_seconds: ttl,
      token: Some("etag-1".to_string()),
    }
  }

  fn backends() -> Vec<Box<dyn CacheBackend>> {
    vec![
      Box::new(MemoryBackend::new()),
      Box::new(SqliteBackend::open_in_memory().expect("in-memory sqlite")),
    ]
  }

  #[test]
  fn test_put_get_round_trip() {
    for backend in backends() {
      let e = entry("issues:acme/api:today", serde_json::json!({"total": 3}), 1800);
      backend.put(&e).unwrap();

      let got = backend.get("issues:acme/api:today").unwrap().unwrap();
      assert_eq!(got.payload, e.payload);
      assert_eq!(got.token.as_deref(), Some("etag-1"));
      assert_eq!(got.ttl_seconds, 1800);
      assert!(backend.get("issues:acme/api:yesterday").unwrap().is_none());
    }
  }

  #[test]
  fn test_freshness_window() {
    let now = Utc::now();
    let mut e = entry("k", serde_json::json!(1), 60);
    e.stored_at = now - chrono::Duration::seconds(30);
    assert!(e.is_fresh(now));
    e.stored_at = now - chrono::Duration::seconds(61);
    assert!(!e.is_fresh(now));
  }

  #[test]
  fn test_touch_extends_ttl_without_changing_payload() {
    for backend in backends() {
      let mut e = entry("k", serde_json::json!({"v": 1}), 60);
      e.stored_at = Utc::now() - chrono::Duration::seconds(3600);
      backend.put(&e).unwrap();
      assert!(!backend.get("k").unwrap().unwrap().is_fresh(Utc::now()));

      assert!(backend.touch("k", Utc::now()).unwrap());
      let got = backend.get("k").unwrap().unwrap();
      assert!(got.is_fresh(Utc::now()));
      assert_eq!(got.payload, e.payload);
      assert_eq!(got.token, e.token);

      assert!(!backend.touch("missing", Utc::now()).unwrap());
    }
  }

  #[test]
  fn test_delete_by_prefix() {
    for backend in backends() {
      for key in [
        "issues:acme/api:today",
        "issues:acme/api:this-week",
        "commits:acme/api:today",
        "issues:acme/web:today",
      ] {
        backend.put(&entry(key, serde_json::json!(1), 60)).unwrap();
      }

      let deleted = backend.delete_by_prefix("issues:acme/api:").unwrap();
      assert_eq!(deleted, 2);
      assert!(backend.get("issues:acme/api:today").unwrap().is_none());
      assert!(backend.get("commits:acme/api:today").unwrap().is_some());
      assert!(backend.get("issues:acme/web:today").unwrap().is_some());
    }
  }
}
