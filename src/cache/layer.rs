//! Cache layer that orchestrates caching logic with conditional fetching.
//!
//! This layer sits between the cached client and the network: a fresh entry
//! is served directly; anything else funnels through the request coalescer
//! into a conditional fetch, so N concurrent dashboard requests for one key
//! cost at most one upstream call.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::coalesce::RequestCoalescer;
use super::key::CacheKey;
use super::store::CacheStore;
use crate::forge::error::ForgeError;

/// Outcome of one upstream fetch attempt made with a revalidation token.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
  /// Upstream confirmed no change; the cached payload stays authoritative.
  NotModified,
  /// Upstream returned a new payload and, optionally, a new token.
  Modified { value: T, token: Option<String> },
}

/// Indicates where a served payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the network.
  Network,
  /// Data from cache, within its TTL window.
  CacheFresh,
  /// Data from cache, confirmed unchanged by a conditional response.
  Revalidated,
  /// Stale data served because the upstream was unreachable.
  Offline,
}

/// A served payload with its provenance.
#[derive(Debug, Clone)]
pub struct CacheHit {
  pub value: Value,
  pub source: CacheSource,
}

/// Conditional-fetch orchestrator over a [`CacheStore`] and a coalescer.
#[derive(Clone)]
pub struct CacheLayer {
  store: CacheStore,
  coalescer: Arc<RequestCoalescer<Result<CacheHit, ForgeError>>>,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      coalescer: Arc::new(RequestCoalescer::new()),
    }
  }

  /// Direct access to the underlying store (invalidation, change-state).
  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Serve `key` from cache or produce it via `producer`.
  ///
  /// The producer receives the last-known revalidation token and reports
  /// whether upstream considered the payload modified:
  /// - not-modified extends the existing entry's TTL and re-serves the cached
  ///   payload untouched (no re-derivation);
  /// - modified payloads are stored with the key's policy TTL and returned;
  /// - on a transport-class error with a stale entry present, the stale
  ///   payload is served (offline mode); without one the error propagates.
  pub async fn get_with<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<CacheHit>
  where
    F: FnOnce(Option<String>) -> Fut,
    Fut: Future<Output = std::result::Result<FetchOutcome<Value>, ForgeError>>,
  {
    let rendered = key.render();

    // Fresh hit: no coalescing, no network.
    if let Some(entry) = self.store.get(&rendered) {
      if entry.is_fresh(Utc::now()) {
        return Ok(CacheHit {
          value: entry.payload,
          source: CacheSource::CacheFresh,
        });
      }
    }

    let ttl = key.ttl_seconds();
    let store = self.store.clone();
    let result = self
      .coalescer
      .coalesce(&rendered, || {
        let rendered = rendered.clone();
        async move {
          // Re-read under the coalescing lease: a racing caller may have
          // already refreshed the entry while this one queued.
          let entry = store.get(&rendered);
          if let Some(e) = &entry {
            if e.is_fresh(Utc::now()) {
              return Ok(CacheHit {
                value: e.payload.clone(),
                source: CacheSource::CacheFresh,
              });
            }
          }
          let token = entry.as_ref().and_then(|e| e.token.clone());

          match producer(token).await {
            Ok(FetchOutcome::NotModified) => match entry {
              Some(e) => {
                debug!(key = rendered.as_str(), "Not modified, extending TTL");
                store.touch(&rendered);
                Ok(CacheHit {
                  value: e.payload,
                  source: CacheSource::Revalidated,
                })
              }
              // A 304 can only answer a request that carried a token, and
              // tokens only come from stored entries.
              None => Err(ForgeError::Decode(
                "not-modified response without a cached entry".to_string(),
              )),
            },
            Ok(FetchOutcome::Modified { value, token }) => {
              store.set(&rendered, value.clone(), ttl, token);
              Ok(CacheHit {
                value,
                source: CacheSource::Network,
              })
            }
            Err(e) if e.is_transport() => match entry {
              Some(stale) => {
                warn!(
                  key = rendered.as_str(),
                  "Upstream unreachable, serving stale cache: {}", e
                );
                Ok(CacheHit {
                  value: stale.payload,
                  source: CacheSource::Offline,
                })
              }
              None => Err(e),
            },
            Err(e) => Err(e),
          }
        }
      })
      .await;

    result.map_err(|e| eyre!(e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::backend::{CacheBackend, CacheEntry, SqliteBackend};
  use crate::cache::key::Domain;
  use crate::stats::period::Period;
  use chrono::Duration;

  fn expired_entry(key: &str, payload: Value, token: Option<&str>) -> CacheEntry {
    CacheEntry {
      key: key.to_string(),
      payload,
      stored_at: Utc::now() - Duration::seconds(7200),
      ttl_seconds: 1800,
      token: token.map(String::from),
    }
  }

  fn layer_with(entries: &[CacheEntry]) -> CacheLayer {
    let backend = Arc::new(SqliteBackend::open_in_memory().expect("in-memory sqlite"));
    for entry in entries {
      backend.put(entry).expect("seed entry");
    }
    CacheLayer::new(CacheStore::with_backend(backend))
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let layer = layer_with(&[]);
    let key = CacheKey::period(Domain::Issues, "acme/api", Period::Today);

    let hit = layer
      .get_with(&key, |token| async move {
        assert!(token.is_none());
        Ok(FetchOutcome::Modified {
          value: serde_json::json!([{"username": "ada", "total": 2}]),
          token: Some("etag-a".to_string()),
        })
      })
      .await
      .unwrap();

    assert_eq!(hit.source, CacheSource::Network);
    let entry = layer.store().get(&key.render()).expect("stored");
    assert_eq!(entry.token.as_deref(), Some("etag-a"));
    assert_eq!(entry.ttl_seconds, 1800);
  }

  #[tokio::test]
  async fn test_fresh_hit_skips_producer() {
    let layer = layer_with(&[]);
    let key = CacheKey::period(Domain::Issues, "acme/api", Period::Today);
    layer
      .store()
      .set(&key.render(), serde_json::json!(1), 1800, None);

    let hit = layer
      .get_with(&key, |_| async move {
        panic!("producer must not run on a fresh hit")
      })
      .await
      .unwrap();

    assert_eq!(hit.source, CacheSource::CacheFresh);
    assert_eq!(hit.value, serde_json::json!(1));
  }

  #[tokio::test]
  async fn test_not_modified_extends_ttl_and_keeps_payload_identical() {
    let payload = serde_json::json!({"users": ["ada", "brian"], "total": 9});
    let key = CacheKey::period(Domain::Issues, "acme/api", Period::Today);
    let layer = layer_with(&[expired_entry(
      &key.render(),
      payload.clone(),
      Some("etag-a"),
    )]);

    let hit = layer
      .get_with(&key, |token| async move {
        assert_eq!(token.as_deref(), Some("etag-a"));
        Ok(FetchOutcome::NotModified)
      })
      .await
      .unwrap();

    assert_eq!(hit.source, CacheSource::Revalidated);
    assert_eq!(hit.value, payload);

    // Entry is fresh again, byte-identical, same token.
    let entry = layer.store().get(&key.render()).expect("still stored");
    assert!(entry.is_fresh(Utc::now()));
    assert_eq!(entry.payload, payload);
    assert_eq!(entry.token.as_deref(), Some("etag-a"));
  }

  #[tokio::test]
  async fn test_transport_error_serves_stale() {
    let payload = serde_json::json!({"total": 4});
    let key = CacheKey::period(Domain::Commits, "acme/api", Period::Today);
    let layer = layer_with(&[expired_entry(&key.render(), payload.clone(), None)]);

    let hit = layer
      .get_with(&key, |_| async move {
        Err(ForgeError::Timeout("connect timeout".to_string()))
      })
      .await
      .unwrap();

    assert_eq!(hit.source, CacheSource::Offline);
    assert_eq!(hit.value, payload);
  }

  #[tokio::test]
  async fn test_transport_error_without_stale_propagates() {
    let layer = layer_with(&[]);
    let key = CacheKey::period(Domain::Commits, "acme/api", Period::Today);

    let err = layer
      .get_with(&key, |_| async move {
        Err(ForgeError::Transport("connection refused".to_string()))
      })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("connection refused"));
  }

  #[tokio::test]
  async fn test_query_error_is_never_masked_by_stale_data() {
    let key = CacheKey::period(Domain::Issues, "acme/api", Period::Today);
    let layer = layer_with(&[expired_entry(&key.render(), serde_json::json!(1), None)]);

    let err = layer
      .get_with(&key, |_| async move {
        Err(ForgeError::NotFound("acme/api".to_string()))
      })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
