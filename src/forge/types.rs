use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open/closed state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
  Open,
  Closed,
}

/// A single entry in a work item's event timeline, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEvent {
  LabelAdded {
    label: String,
    at: DateTime<Utc>,
  },
  LabelRemoved {
    label: String,
    at: DateTime<Utc>,
  },
  Assigned {
    username: String,
    at: DateTime<Utc>,
  },
  Unassigned {
    username: String,
    at: DateTime<Utc>,
  },
}

impl TimelineEvent {
  /// Timestamp of the event, regardless of kind.
  pub fn at(&self) -> DateTime<Utc> {
    match self {
      Self::LabelAdded { at, .. }
      | Self::LabelRemoved { at, .. }
      | Self::Assigned { at, .. }
      | Self::Unassigned { at, .. } => *at,
    }
  }
}

/// Immutable snapshot of a work item as of fetch time.
///
/// Snapshots are superseded by later fetches, never mutated in place. They
/// live only for the duration of one sync pass and are discarded after
/// aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
  pub external_id: String,
  pub number: u64,
  pub repo: String,
  pub title: String,
  pub body: Option<String>,
  /// Label names in the order the upstream reports them.
  pub labels: Vec<String>,
  /// Usernames currently assigned.
  pub assignees: Vec<String>,
  pub state: ItemState,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  /// Timeline events in timestamp order (label add/remove, assignment changes).
  pub events: Vec<TimelineEvent>,
}

impl WorkItem {
  /// Most recent assignment event for the given user, if any.
  ///
  /// Multiple assignment events per user collapse to the latest one.
  pub fn last_assigned_at(&self, username: &str) -> Option<DateTime<Utc>> {
    self
      .events
      .iter()
      .filter_map(|e| match e {
        TimelineEvent::Assigned { username: u, at } if u == username => Some(*at),
        _ => None,
      })
      .max()
  }
}

/// A commit as reported by the upstream listing (recency-ordered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
  pub sha: String,
  /// Platform username of the author; absent for unmapped commit emails.
  pub author: Option<String>,
  pub message: String,
  pub authored_at: DateTime<Utc>,
}

/// Repository metadata used for change detection and dashboard headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMeta {
  pub identifier: String,
  pub description: Option<String>,
  pub default_branch: String,
  pub pushed_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

impl RepoMeta {
  /// Composed state string used by the change-detection endpoint.
  ///
  /// A repository is considered changed when this value differs from the
  /// previously stored one.
  pub fn change_state(&self) -> String {
    let pushed = self
      .pushed_at
      .map(|t| t.to_rfc3339())
      .unwrap_or_default();
    format!("{}|{}", pushed, self.updated_at.to_rfc3339())
  }
}

/// Search listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSummary {
  pub identifier: String,
  pub description: Option<String>,
}
