//! Typed cache keys and the TTL policy table.
//!
//! Keys render as `{domain}:{repoIdentifier}:{periodFilter}[:{extra}]`, which
//! keeps repository-scoped invalidation a plain prefix delete.

use crate::stats::period::Period;

/// Short TTL for periods that cover the current day.
pub const TTL_HOT_PERIOD: i64 = 1800;
/// Long TTL for closed periods (yesterday, last week, any month).
pub const TTL_COLD_PERIOD: i64 = 86400;
/// Repository metadata, languages and change-state entries.
pub const TTL_REPO_META: i64 = 300;
/// Repository search listings.
pub const TTL_SEARCH: i64 = 120;

/// Cache key domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
  Issues,
  Commits,
  Languages,
  Timeline,
  RepoMeta,
  RepoChangeState,
  Search,
}

impl Domain {
  pub fn as_str(&self) -> &'static str {
    match self {
      Domain::Issues => "issues",
      Domain::Commits => "commits",
      Domain::Languages => "languages",
      Domain::Timeline => "timeline",
      Domain::RepoMeta => "repo-meta",
      Domain::RepoChangeState => "repo-change-state",
      Domain::Search => "search",
    }
  }
}

/// A fully-specified cache key.
#[derive(Debug, Clone)]
pub enum CacheKey {
  /// Period-scoped statistics for one repository (issues/commits/timeline).
  PeriodStats {
    domain: Domain,
    repo: String,
    period: Period,
  },
  /// Repository-scoped metadata (repo-meta, languages, repo-change-state).
  Repo { domain: Domain, repo: String },
  /// Sync bookkeeping for one repository's incremental engine.
  SyncState { repo: String },
  /// Global search listing for a query string.
  Search { query: String },
}

impl CacheKey {
  pub fn period(domain: Domain, repo: &str, period: Period) -> Self {
    CacheKey::PeriodStats {
      domain,
      repo: repo.to_string(),
      period,
    }
  }

  pub fn repo(domain: Domain, repo: &str) -> Self {
    CacheKey::Repo {
      domain,
      repo: repo.to_string(),
    }
  }

  pub fn sync_state(repo: &str) -> Self {
    CacheKey::SyncState {
      repo: repo.to_string(),
    }
  }

  pub fn search(query: &str) -> Self {
    CacheKey::Search {
      query: query.trim().to_lowercase(),
    }
  }

  /// The stored string form of the key.
  pub fn render(&self) -> String {
    match self {
      CacheKey::PeriodStats {
        domain,
        repo,
        period,
      } => format!("{}:{}:{}", domain.as_str(), repo, period.cache_token()),
      CacheKey::Repo { domain, repo } => format!("{}:{}", domain.as_str(), repo),
      CacheKey::SyncState { repo } => format!("repo-meta:{}:sync-state", repo),
      CacheKey::Search { query } => format!("search:{}", query),
    }
  }

  /// TTL for the entry this key addresses, per the policy table.
  pub fn ttl_seconds(&self) -> i64 {
    match self {
      CacheKey::PeriodStats { period, .. } => {
        if period.is_hot() {
          TTL_HOT_PERIOD
        } else {
          TTL_COLD_PERIOD
        }
      }
      CacheKey::Repo { .. } | CacheKey::SyncState { .. } => TTL_REPO_META,
      CacheKey::Search { .. } => TTL_SEARCH,
    }
  }
}

/// Prefixes covering every period-scoped entry of one repository.
///
/// Used by the signed invalidation event to clear a repository's derived
/// statistics while leaving metadata and change-state entries in place.
pub fn period_scoped_prefixes(repo: &str) -> Vec<String> {
  [Domain::Issues, Domain::Commits, Domain::Timeline]
    .iter()
    .map(|d| format!("{}:{}:", d.as_str(), repo))
    .collect()
}
