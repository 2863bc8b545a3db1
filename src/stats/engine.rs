//! Incremental per-period synchronization and aggregation.
//!
//! Pages through work items most-recently-updated first, terminating early
//! once updates predate the period's cutoff instant, then folds the surviving
//! snapshots into per-user period statistics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::cache::layer::FetchOutcome;
use crate::forge::client::{ForgeClient, PAGE_SIZE};
use crate::forge::error::ForgeError;
use crate::forge::types::{CommitInfo, WorkItem};
use crate::stats::period::PeriodRange;
use crate::stats::status::{derive_status, Status};
use crate::stats::timeline::{replay, ItemTimeline};
use crate::stats::weight::item_weight;

/// Assignment events can predate an item's last update by this much; older
/// items cannot carry assignments that still matter to the period.
pub const LOOKBACK_DAYS: i64 = 7;

/// Upper bound on pages fetched per sync pass.
pub const MAX_PAGES: usize = 10;

/// Per-user statistics for one period. Derived, recomputed per request; the
/// work-item set stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodUserStats {
  pub username: String,
  /// Count per canonical status, zeros included for a stable shape.
  pub counts: BTreeMap<Status, u32>,
  pub weight: u32,
  pub total: u32,
}

impl PeriodUserStats {
  fn new(username: &str) -> Self {
    Self {
      username: username.to_string(),
      counts: Status::priority_order().map(|s| (s, 0)).collect(),
      weight: 0,
      total: 0,
    }
  }
}

/// Per-user commit count for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterStats {
  pub username: String,
  pub commits: u32,
}

/// Earliest `updated_at` that could still affect the given period.
pub fn cutoff_instant(range: &PeriodRange) -> DateTime<Utc> {
  range.start - Duration::days(LOOKBACK_DAYS)
}

/// Split a recency-ordered page at the cutoff.
///
/// Keeps items until the first one strictly older than `cutoff` (the boundary
/// itself is inclusive) and reports whether the cutoff was crossed, which ends
/// the scan: pagination is recency-ordered, so no later page can contain
/// newer items.
pub fn take_until_cutoff(
  items: Vec<WorkItem>,
  cutoff: DateTime<Utc>,
) -> (Vec<WorkItem>, bool) {
  let mut kept = Vec::with_capacity(items.len());
  for item in items {
    if item.updated_at < cutoff {
      return (kept, true);
    }
    kept.push(item);
  }
  (kept, false)
}

/// Fold work-item snapshots into per-user statistics for the window.
///
/// An item counts toward a user exactly when the user is still a current
/// assignee and their most recent assignment event falls inside the window;
/// the item contributes one tally under its derived status plus its summed
/// weight markers. Output is sorted by total descending, ties by username.
pub fn aggregate_user_stats(items: &[WorkItem], window: &PeriodRange) -> Vec<PeriodUserStats> {
  let mut per_user: BTreeMap<String, PeriodUserStats> = BTreeMap::new();

  for item in items {
    if item.assignees.is_empty() {
      continue;
    }
    let status = derive_status(&item.labels);
    let weight = item_weight(&item.title, item.body.as_deref(), &item.labels);

    // Iterating current assignees guards against counting a user who was
    // later unassigned; the event log alone would still name them.
    for assignee in &item.assignees {
      let Some(assigned_at) = item.last_assigned_at(assignee) else {
        continue;
      };
      if !window.contains(assigned_at) {
        continue;
      }

      let stats = per_user
        .entry(assignee.clone())
        .or_insert_with(|| PeriodUserStats::new(assignee));
      *stats.counts.entry(status).or_insert(0) += 1;
      stats.weight = stats.weight.saturating_add(weight);
      stats.total += 1;
    }
  }

  let mut stats: Vec<PeriodUserStats> = per_user.into_values().collect();
  stats.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.username.cmp(&b.username)));
  stats
}

/// Replayed status timelines for every item that counts toward the window.
pub fn build_timelines(
  items: &[WorkItem],
  window: &PeriodRange,
  now: DateTime<Utc>,
) -> Vec<ItemTimeline> {
  items
    .iter()
    .filter(|item| {
      item
        .assignees
        .iter()
        .filter_map(|a| item.last_assigned_at(a))
        .any(|at| window.contains(at))
    })
    .map(|item| ItemTimeline {
      number: item.number,
      title: item.title.clone(),
      assignees: item.assignees.clone(),
      intervals: replay(
        item.created_at,
        &item.events,
        &item.labels,
        item.updated_at,
        item.closed_at,
        now,
      ),
    })
    .collect()
}

/// Per-author commit counts within the window, sorted by count descending.
pub fn aggregate_commit_stats(commits: &[CommitInfo], window: &PeriodRange) -> Vec<CommitterStats> {
  let mut per_user: BTreeMap<String, u32> = BTreeMap::new();
  for commit in commits {
    let Some(author) = &commit.author else {
      continue;
    };
    if window.contains(commit.authored_at) {
      *per_user.entry(author.clone()).or_insert(0) += 1;
    }
  }

  let mut stats: Vec<CommitterStats> = per_user
    .into_iter()
    .map(|(username, commits)| CommitterStats { username, commits })
    .collect();
  stats.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.username.cmp(&b.username)));
  stats
}

/// Cursor-paginated fetch + aggregation engine over the forge client.
#[derive(Clone)]
pub struct SyncEngine {
  client: ForgeClient,
}

impl SyncEngine {
  pub fn new(client: ForgeClient) -> Self {
    Self { client }
  }

  /// Scan work items updated since the period's cutoff.
  ///
  /// The revalidation token rides on the first page only: a 304 there means
  /// nothing relevant changed and the whole scan is skipped. A malformed page
  /// past the first ends the scan with what was collected so far rather than
  /// failing it.
  async fn scan_items(
    &self,
    repo: &str,
    cutoff: DateTime<Utc>,
    token: Option<&str>,
  ) -> Result<FetchOutcome<Vec<WorkItem>>, ForgeError> {
    let mut collected: Vec<WorkItem> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut first_page_token: Option<String> = None;

    for page_index in 0..MAX_PAGES {
      let etag = if page_index == 0 { token } else { None };
      let outcome = match self
        .client
        .list_work_items(repo, cursor.as_deref(), etag)
        .await
      {
        Ok(outcome) => outcome,
        // A malformed page past the first does not abort the sync; serve
        // what was collected so far.
        Err(ForgeError::Decode(e)) if page_index > 0 => {
          warn!(repo, page = page_index, "Skipping malformed page: {}", e);
          break;
        }
        Err(e) => return Err(e),
      };

      let page = match outcome {
        FetchOutcome::NotModified => {
          debug!(repo, "Work items unchanged upstream, skipping scan");
          return Ok(FetchOutcome::NotModified);
        }
        FetchOutcome::Modified { value, token } => {
          if page_index == 0 {
            first_page_token = token;
          }
          value
        }
      };

      let page_len = page.items.len();
      let (kept, crossed) = take_until_cutoff(page.items, cutoff);
      collected.extend(kept);

      if crossed || page.next_cursor.is_none() || page_len < PAGE_SIZE as usize {
        break;
      }
      cursor = page.next_cursor;
    }

    debug!(repo, items = collected.len(), "Work item scan complete");
    Ok(FetchOutcome::Modified {
      value: collected,
      token: first_page_token,
    })
  }

  /// Sync per-user issue statistics for one repo and period window.
  pub async fn sync_issue_stats(
    &self,
    repo: &str,
    window: &PeriodRange,
    token: Option<&str>,
  ) -> Result<FetchOutcome<Value>, ForgeError> {
    match self.scan_items(repo, cutoff_instant(window), token).await? {
      FetchOutcome::NotModified => Ok(FetchOutcome::NotModified),
      FetchOutcome::Modified { value: items, token } => {
        let stats = aggregate_user_stats(&items, window);
        Ok(FetchOutcome::Modified {
          value: to_payload(&stats)?,
          token,
        })
      }
    }
  }

  /// Sync replayed status timelines for one repo and period window.
  pub async fn sync_timelines(
    &self,
    repo: &str,
    window: &PeriodRange,
    token: Option<&str>,
    now: DateTime<Utc>,
  ) -> Result<FetchOutcome<Value>, ForgeError> {
    match self.scan_items(repo, cutoff_instant(window), token).await? {
      FetchOutcome::NotModified => Ok(FetchOutcome::NotModified),
      FetchOutcome::Modified { value: items, token } => {
        let timelines = build_timelines(&items, window, now);
        Ok(FetchOutcome::Modified {
          value: to_payload(&timelines)?,
          token,
        })
      }
    }
  }

  /// Sync per-user commit counts for one repo and period window.
  ///
  /// Commits carry no assignment lag, so the scan terminates at the window
  /// start itself rather than at the lookback cutoff.
  pub async fn sync_commit_stats(
    &self,
    repo: &str,
    window: &PeriodRange,
    token: Option<&str>,
  ) -> Result<FetchOutcome<Value>, ForgeError> {
    let mut collected: Vec<CommitInfo> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut first_page_token: Option<String> = None;

    for page_index in 0..MAX_PAGES {
      let etag = if page_index == 0 { token } else { None };
      let outcome = self
        .client
        .list_commits(repo, cursor.as_deref(), etag)
        .await?;

      let page = match outcome {
        FetchOutcome::NotModified => {
          debug!(repo, "Commits unchanged upstream, skipping scan");
          return Ok(FetchOutcome::NotModified);
        }
        FetchOutcome::Modified { value, token } => {
          if page_index == 0 {
            first_page_token = token;
          }
          value
        }
      };

      let page_len = page.commits.len();
      let mut crossed = false;
      for commit in page.commits {
        if commit.authored_at < window.start {
          crossed = true;
          break;
        }
        collected.push(commit);
      }

      if crossed || page.next_cursor.is_none() || page_len < PAGE_SIZE as usize {
        break;
      }
      cursor = page.next_cursor;
    }

    let stats = aggregate_commit_stats(&collected, window);
    Ok(FetchOutcome::Modified {
      value: to_payload(&stats)?,
      token: first_page_token,
    })
  }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ForgeError> {
  serde_json::to_value(value).map_err(|e| ForgeError::Decode(e.to_string()))
}
