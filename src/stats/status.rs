//! Canonical work-item statuses derived from labels.
//!
//! The upstream tracks progress through plain labels; this module collapses a
//! label set into one canonical status using a single fixed priority table.

use serde::{Deserialize, Serialize};

/// Canonical status of a work item, lowest to highest priority.
///
/// Declaration order doubles as priority order so `Ord` can be derived.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
  /// Default status: the item is assigned but carries no status label.
  Assigned,
  InProgress,
  InReview,
  ReadyForDeploy,
  /// Terminal status: the change is verified on the deployment target.
  Deployed,
}

/// Label name backing each non-default status, highest priority first.
///
/// Matching is case-insensitive and exact (not substring), so a label like
/// "in review comments" never counts as "in review".
const STATUS_LABELS: &[(Status, &str)] = &[
  (Status::Deployed, "deployed"),
  (Status::ReadyForDeploy, "ready for deploy"),
  (Status::InReview, "in review"),
  (Status::InProgress, "in progress"),
];

impl Status {
  /// All statuses from highest to lowest priority, including the default.
  pub fn priority_order() -> impl Iterator<Item = Status> {
    STATUS_LABELS
      .iter()
      .map(|(s, _)| *s)
      .chain(std::iter::once(Status::Assigned))
  }

  /// The status a single label maps to, if it is a status label at all.
  pub fn for_label(label: &str) -> Option<Status> {
    STATUS_LABELS
      .iter()
      .find(|(_, name)| label.eq_ignore_ascii_case(name))
      .map(|(s, _)| *s)
  }

  /// Stable identifier used in serialized payloads and logs.
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Assigned => "assigned",
      Status::InProgress => "in-progress",
      Status::InReview => "in-review",
      Status::ReadyForDeploy => "ready-for-deploy",
      Status::Deployed => "deployed",
    }
  }
}

/// Collapse a label set into one canonical status.
///
/// Only the single highest-priority matching label determines the result;
/// the presence of several status labels never combines. Labels that map to
/// no status are ignored, and an item without any status label is `Assigned`.
pub fn derive_status<S: AsRef<str>>(labels: &[S]) -> Status {
  for (status, name) in STATUS_LABELS {
    if labels.iter().any(|l| l.as_ref().eq_ignore_ascii_case(name)) {
      return *status;
    }
  }
  Status::Assigned
}
