//! Serde-deserializable types matching forge API responses.
//!
//! These types are separate from domain types so raw upstream shapes stay
//! contained: the conversion boundary sits immediately after the network
//! call and nothing past it sees an untyped payload.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::types::{CommitInfo, ItemState, RepoMeta, RepoSummary, TimelineEvent, WorkItem};

/// Re-serialize a value through JSON to convert between compatible types.
/// Used to parse page entries one at a time so a single malformed item can
/// be skipped without discarding the page.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
  pub name: String,
}

// ============================================================================
// Work item listing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTimelineEvent {
  /// "labeled", "unlabeled", "assigned" or "unassigned"; other kinds are
  /// present upstream but irrelevant here.
  pub event: String,
  pub label: Option<ApiLabel>,
  pub assignee: Option<ApiUser>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApiWorkItem {
  pub id: String,
  pub number: u64,
  #[serde(default)]
  pub title: String,
  pub body: Option<String>,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  #[serde(default)]
  pub assignees: Vec<ApiUser>,
  #[serde(default)]
  pub state: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub events: Vec<ApiTimelineEvent>,
}

/// One page of the work-item listing. Items are kept as raw values so each
/// can be parsed (and, if malformed, skipped) individually.
#[derive(Debug, Deserialize)]
pub struct ApiItemPage {
  #[serde(default)]
  pub items: Vec<serde_json::Value>,
  pub next_cursor: Option<String>,
}

// ============================================================================
// Commit listing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCommit {
  pub sha: String,
  #[serde(default)]
  pub message: String,
  /// Platform account of the author; null for unmapped commit emails.
  pub author: Option<ApiUser>,
  pub authored_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCommitPage {
  #[serde(default)]
  pub commits: Vec<serde_json::Value>,
  pub next_cursor: Option<String>,
}

// ============================================================================
// Repository metadata, languages, search
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRepo {
  pub full_name: String,
  pub description: Option<String>,
  #[serde(default = "default_branch")]
  pub default_branch: String,
  pub pushed_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

fn default_branch() -> String {
  "main".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub items: Vec<ApiRepo>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl ApiWorkItem {
  pub fn into_domain(self, repo: &str) -> WorkItem {
    let mut events: Vec<TimelineEvent> = self
      .events
      .into_iter()
      .filter_map(ApiTimelineEvent::into_domain)
      .collect();
    events.sort_by_key(TimelineEvent::at);

    WorkItem {
      external_id: self.id,
      number: self.number,
      repo: repo.to_string(),
      title: self.title,
      body: self.body,
      labels: self.labels.into_iter().map(|l| l.name).collect(),
      assignees: self.assignees.into_iter().map(|u| u.login).collect(),
      state: if self.state == "closed" {
        ItemState::Closed
      } else {
        ItemState::Open
      },
      created_at: self.created_at,
      updated_at: self.updated_at,
      closed_at: self.closed_at,
      events,
    }
  }
}

impl ApiTimelineEvent {
  /// Map an upstream event row to a domain event; rows of irrelevant kinds
  /// (or missing their subject) collapse to None.
  fn into_domain(self) -> Option<TimelineEvent> {
    let at = self.created_at;
    match self.event.as_str() {
      "labeled" => self.label.map(|l| TimelineEvent::LabelAdded {
        label: l.name,
        at,
      }),
      "unlabeled" => self.label.map(|l| TimelineEvent::LabelRemoved {
        label: l.name,
        at,
      }),
      "assigned" => self.assignee.map(|u| TimelineEvent::Assigned {
        username: u.login,
        at,
      }),
      "unassigned" => self.assignee.map(|u| TimelineEvent::Unassigned {
        username: u.login,
        at,
      }),
      _ => None,
    }
  }
}

impl From<ApiCommit> for CommitInfo {
  fn from(c: ApiCommit) -> Self {
    CommitInfo {
      sha: c.sha,
      author: c.author.map(|u| u.login),
      message: c.message,
      authored_at: c.authored_at,
    }
  }
}

impl From<ApiRepo> for RepoMeta {
  fn from(r: ApiRepo) -> Self {
    RepoMeta {
      identifier: r.full_name,
      description: r.description,
      default_branch: r.default_branch,
      pushed_at: r.pushed_at,
      updated_at: r.updated_at,
    }
  }
}

impl From<ApiRepo> for RepoSummary {
  fn from(r: ApiRepo) -> Self {
    RepoSummary {
      identifier: r.full_name,
      description: r.description,
    }
  }
}
