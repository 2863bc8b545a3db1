//! Cached forge client that wraps [`ForgeClient`] with transparent caching.
//!
//! This is the process-lifetime registry for the whole engine: it owns the
//! cache store, the request coalescer and the sync engine, and components
//! receive it by injection — there is no ambient global state, so tests get
//! a fresh registry each.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use crate::cache::key::{period_scoped_prefixes, CacheKey, Domain};
use crate::cache::layer::{CacheLayer, FetchOutcome};
use crate::cache::store::CacheStore;
use crate::config::Config;
use crate::stats::engine::{CommitterStats, PeriodUserStats, SyncEngine};
use crate::stats::period::Period;
use crate::stats::timeline::ItemTimeline;

use super::client::ForgeClient;
use super::error::ForgeError;
use super::types::{RepoMeta, RepoSummary};

/// Conditional fetches reuse stored tokens for at most this long before a
/// full re-derive is forced, guarding against token drift.
pub const FULL_REFRESH_HOURS: i64 = 24;

/// Sync bookkeeping per repository, updated after every successful sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetadata {
  pub repo: String,
  pub last_fetched_at: DateTime<Utc>,
  pub last_full_refresh_at: DateTime<Utc>,
  pub token: Option<String>,
}

/// Forge client with transparent caching support.
///
/// Wraps the underlying client with the same API shape, but serves from the
/// cache where possible, coalesces concurrent misses and revalidates stale
/// entries conditionally.
#[derive(Clone)]
pub struct CachedForgeClient {
  inner: ForgeClient,
  engine: SyncEngine,
  layer: CacheLayer,
}

impl CachedForgeClient {
  /// Create a new cached forge client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::api_token()?;
    let inner = ForgeClient::new(
      &config.forge.url,
      token,
      StdDuration::from_secs(config.forge.http_timeout_secs),
    )?;
    let store = CacheStore::open(&config.cache_path()?);
    Ok(Self::with_parts(inner, store))
  }

  /// Assemble a client from explicit parts (tests inject both).
  pub fn with_parts(inner: ForgeClient, store: CacheStore) -> Self {
    Self {
      engine: SyncEngine::new(inner.clone()),
      layer: CacheLayer::new(store),
      inner,
    }
  }

  /// Last-seen remaining request budget of the upstream.
  pub fn remaining_quota(&self) -> i64 {
    self.inner.remaining_quota()
  }

  /// Per-user issue statistics for one repository and period.
  pub async fn issue_stats(&self, repo: &str, period: Period) -> Result<Vec<PeriodUserStats>> {
    let key = CacheKey::period(Domain::Issues, repo, period);
    let now = Utc::now();
    let window = period.resolve(now);
    let engine = self.engine.clone();
    let store = self.layer.store().clone();
    let repo = repo.to_string();

    let hit = self
      .layer
      .get_with(&key, |entry_token| async move {
        let (token, full) = effective_token(&store, &repo, entry_token, now);
        let outcome = engine
          .sync_issue_stats(&repo, &window, token.as_deref())
          .await?;
        if let FetchOutcome::Modified { token: new_token, .. } = &outcome {
          record_sync(&store, &repo, now, full, new_token.clone());
        }
        Ok(outcome)
      })
      .await?;

    decode(hit.value, "issue stats")
  }

  /// Per-user commit counts for one repository and period.
  pub async fn commit_stats(&self, repo: &str, period: Period) -> Result<Vec<CommitterStats>> {
    let key = CacheKey::period(Domain::Commits, repo, period);
    let now = Utc::now();
    let window = period.resolve(now);
    let engine = self.engine.clone();
    let repo = repo.to_string();

    let hit = self
      .layer
      .get_with(&key, |token| async move {
        engine
          .sync_commit_stats(&repo, &window, token.as_deref())
          .await
      })
      .await?;

    decode(hit.value, "commit stats")
  }

  /// Replayed status timelines for one repository and period.
  pub async fn timeline_stats(&self, repo: &str, period: Period) -> Result<Vec<ItemTimeline>> {
    let key = CacheKey::period(Domain::Timeline, repo, period);
    let now = Utc::now();
    let window = period.resolve(now);
    let engine = self.engine.clone();
    let repo = repo.to_string();

    let hit = self
      .layer
      .get_with(&key, |token| async move {
        engine
          .sync_timelines(&repo, &window, token.as_deref(), now)
          .await
      })
      .await?;

    decode(hit.value, "timelines")
  }

  /// Language byte breakdown, cached per the repo-metadata TTL.
  pub async fn languages(&self, repo: &str) -> Result<BTreeMap<String, u64>> {
    let key = CacheKey::repo(Domain::Languages, repo);
    let inner = self.inner.clone();
    let repo = repo.to_string();

    let hit = self
      .layer
      .get_with(&key, |token| async move {
        into_value_outcome(inner.languages(&repo, token.as_deref()).await?)
      })
      .await?;

    decode(hit.value, "languages")
  }

  /// Repository metadata, cached per the repo-metadata TTL.
  pub async fn repo_meta(&self, repo: &str) -> Result<RepoMeta> {
    let key = CacheKey::repo(Domain::RepoMeta, repo);
    let inner = self.inner.clone();
    let repo = repo.to_string();

    let hit = self
      .layer
      .get_with(&key, |token| async move {
        into_value_outcome(inner.repo_meta(&repo, token.as_deref()).await?)
      })
      .await?;

    decode(hit.value, "repo metadata")
  }

  /// Repository search listing, cached briefly.
  pub async fn search_repos(&self, query: &str) -> Result<Vec<RepoSummary>> {
    let key = CacheKey::search(query);
    let inner = self.inner.clone();
    let query = query.to_string();

    let hit = self
      .layer
      .get_with(&key, |_| async move {
        let repos = inner.search_repos(&query).await?;
        Ok(FetchOutcome::Modified {
          value: serde_json::to_value(repos)
            .map_err(|e| ForgeError::Decode(e.to_string()))?,
          token: None,
        })
      })
      .await?;

    decode(hit.value, "search results")
  }

  /// Whether the repository changed since the last check.
  ///
  /// Compares a composed state string (last push + last update) against the
  /// previously stored one, itself refreshed via a conditional request. A
  /// transport error reads as changed — the system fails open toward
  /// freshness, never claiming knowledge it cannot verify.
  pub async fn has_repo_changed(&self, repo: &str) -> Result<bool> {
    let key = CacheKey::repo(Domain::RepoChangeState, repo);
    let rendered = key.render();
    let store = self.layer.store();

    let prev = store.get(&rendered);
    let prev_state: Option<String> = prev
      .as_ref()
      .and_then(|e| e.payload.as_str().map(String::from));
    let token = prev.as_ref().and_then(|e| e.token.clone());

    match self.inner.repo_meta(repo, token.as_deref()).await {
      Ok(FetchOutcome::NotModified) => {
        store.touch(&rendered);
        Ok(false)
      }
      Ok(FetchOutcome::Modified { value, token }) => {
        let state = value.change_state();
        let changed = prev_state.as_deref() != Some(state.as_str());
        store.set(&rendered, Value::String(state), key.ttl_seconds(), token);
        Ok(changed)
      }
      Err(e) if e.is_transport() => {
        warn!(repo, "Change detection unreachable, assuming changed: {}", e);
        Ok(true)
      }
      Err(e) => Err(eyre!(e)),
    }
  }

  /// Clear every period-scoped entry for a repository.
  ///
  /// Driven by the signed invalidation event; repo metadata and change-state
  /// entries stay in place.
  pub fn invalidate_repo(&self, repo: &str) -> u64 {
    let store = self.layer.store();
    let mut deleted = 0;
    for prefix in period_scoped_prefixes(repo) {
      deleted += store.delete_by_prefix(&prefix);
    }
    info!(repo, deleted, "Invalidated period-scoped cache entries");
    deleted
  }

  /// One scheduler pass over a repository: detect change, then re-warm the
  /// hot periods (issues and commits for today and this week).
  ///
  /// Unchanged repositories settle on cheap conditional 304s; changed ones
  /// have their hot entries dropped first so the warm-up re-derives.
  pub async fn refresh_repo(&self, repo: &str) -> Result<()> {
    let changed = self.has_repo_changed(repo).await?;
    if changed {
      let store = self.layer.store();
      for period in [Period::Today, Period::ThisWeek] {
        for domain in [Domain::Issues, Domain::Commits, Domain::Timeline] {
          store.delete(&CacheKey::period(domain, repo, period).render());
        }
      }
    }

    for period in [Period::Today, Period::ThisWeek] {
      self.issue_stats(repo, period).await?;
      self.commit_stats(repo, period).await?;
    }
    Ok(())
  }
}

/// Pick the token for a conditional sync, forcing a periodic full re-derive.
fn effective_token(
  store: &CacheStore,
  repo: &str,
  entry_token: Option<String>,
  now: DateTime<Utc>,
) -> (Option<String>, bool) {
  let meta = load_sync_metadata(store, repo);
  let force_full = meta
    .as_ref()
    .map_or(true, |m| now - m.last_full_refresh_at > Duration::hours(FULL_REFRESH_HOURS));

  if force_full {
    (None, true)
  } else {
    (entry_token.or_else(|| meta.and_then(|m| m.token)), false)
  }
}

fn load_sync_metadata(store: &CacheStore, repo: &str) -> Option<SyncMetadata> {
  let entry = store.get(&CacheKey::sync_state(repo).render())?;
  serde_json::from_value(entry.payload).ok()
}

/// Persist sync bookkeeping after a successful modified sync.
fn record_sync(
  store: &CacheStore,
  repo: &str,
  now: DateTime<Utc>,
  was_full: bool,
  token: Option<String>,
) {
  let last_full = if was_full {
    now
  } else {
    load_sync_metadata(store, repo)
      .map(|m| m.last_full_refresh_at)
      .unwrap_or(now)
  };

  let meta = SyncMetadata {
    repo: repo.to_string(),
    last_fetched_at: now,
    last_full_refresh_at: last_full,
    token,
  };
  let key = CacheKey::sync_state(repo);
  match serde_json::to_value(&meta) {
    Ok(payload) => store.set(&key.render(), payload, key.ttl_seconds(), None),
    Err(e) => warn!(repo, "Failed to serialize sync metadata: {}", e),
  }
}

fn into_value_outcome<T: Serialize>(
  outcome: FetchOutcome<T>,
) -> std::result::Result<FetchOutcome<Value>, ForgeError> {
  Ok(match outcome {
    FetchOutcome::NotModified => FetchOutcome::NotModified,
    FetchOutcome::Modified { value, token } => FetchOutcome::Modified {
      value: serde_json::to_value(value).map_err(|e| ForgeError::Decode(e.to_string()))?,
      token,
    },
  })
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode cached {}: {}", what, e))
}
