//! Status-timeline reconstruction for a single work item.
//!
//! Replays the item's ordered event log (label added/removed, assignment
//! changes) into a contiguous, non-overlapping list of status intervals
//! covering creation through closure (or "now" for open items).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forge::types::TimelineEvent;
use crate::stats::status::{derive_status, Status};

/// A contiguous half-open span of one canonical status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInterval {
  pub status: Status,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub duration_ms: i64,
}

impl StatusInterval {
  fn new(status: Status, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self {
      status,
      start,
      end,
      duration_ms: (end - start).num_milliseconds(),
    }
  }
}

/// Replayed timeline for one work item, the payload of the timeline domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTimeline {
  pub number: u64,
  pub title: String,
  pub assignees: Vec<String>,
  pub intervals: Vec<StatusInterval>,
}

struct Replay {
  intervals: Vec<StatusInterval>,
  current: Status,
  current_start: DateTime<Utc>,
  end_instant: DateTime<Utc>,
}

impl Replay {
  /// Close the running interval at `at` and continue in `to`.
  ///
  /// Transitions at the running interval's start replace the status in place
  /// instead of emitting a zero-length interval; transitions at or past the
  /// end instant are dropped (they could only produce zero-length tails).
  fn transition(&mut self, to: Status, at: DateTime<Utc>) {
    if to == self.current || at >= self.end_instant {
      return;
    }
    let at = at.max(self.current_start);
    if at == self.current_start {
      self.current = to;
      return;
    }
    self
      .intervals
      .push(StatusInterval::new(self.current, self.current_start, at));
    self.current = to;
    self.current_start = at;
  }

  fn finish(mut self) -> Vec<StatusInterval> {
    self.intervals.push(StatusInterval::new(
      self.current,
      self.current_start,
      self.end_instant,
    ));
    self.intervals
  }
}

/// Reconstruct the status-interval history of one work item.
///
/// Starts in the default status at `created_at` and walks `events` in
/// timestamp order: a label-added event whose label maps to a different
/// canonical status than the current one opens a new interval; removing the
/// label backing the current status reverts to the default. After the walk,
/// the result is reconciled against the item's current label set: when the
/// highest-priority present label disagrees with the last interval (some
/// intermediate events were not retained upstream), one more transition is
/// synthesized at `updated_at`. The final interval closes at `closed_at`
/// for closed items, else at `now`.
///
/// The returned intervals are contiguous and non-overlapping, and their
/// summed duration equals the elapsed time from creation to the end instant.
pub fn replay(
  created_at: DateTime<Utc>,
  events: &[TimelineEvent],
  current_labels: &[String],
  updated_at: DateTime<Utc>,
  closed_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> Vec<StatusInterval> {
  let end_instant = closed_at.unwrap_or(now).max(created_at);

  let mut state = Replay {
    intervals: Vec::new(),
    current: Status::Assigned,
    current_start: created_at,
    end_instant,
  };

  // The upstream log is already ordered; sorting keeps the walk correct for
  // items whose events arrive interleaved from multiple pages.
  let mut ordered: Vec<&TimelineEvent> = events.iter().collect();
  ordered.sort_by_key(|e| e.at());

  for event in ordered {
    match event {
      TimelineEvent::LabelAdded { label, at } => {
        if let Some(status) = Status::for_label(label) {
          state.transition(status, *at);
        }
      }
      TimelineEvent::LabelRemoved { label, at } => {
        if Status::for_label(label) == Some(state.current) {
          state.transition(Status::Assigned, *at);
        }
      }
      // Assignment changes never move the status timeline.
      TimelineEvent::Assigned { .. } | TimelineEvent::Unassigned { .. } => {}
    }
  }

  // Reconcile with the labels present right now: intermediate events may not
  // have been retained, so trust the current label set over the replayed end
  // state and synthesize the missing transition at the last update.
  let present = derive_status(current_labels);
  if present != state.current && updated_at > state.current_start {
    state.transition(present, updated_at);
  }

  state.finish()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(s: &str) -> DateTime<Utc> {
    s.parse().expect("test timestamp")
  }

  fn added(label: &str, ts: &str) -> TimelineEvent {
    TimelineEvent::LabelAdded {
      label: label.to_string(),
      at: at(ts),
    }
  }

  fn removed(label: &str, ts: &str) -> TimelineEvent {
    TimelineEvent::LabelRemoved {
      label: label.to_string(),
      at: at(ts),
    }
  }

  fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  /// No gaps, no overlaps, full coverage from creation to the end instant.
  fn assert_invariants(
    intervals: &[StatusInterval],
    created: DateTime<Utc>,
    end: DateTime<Utc>,
  ) {
    assert!(!intervals.is_empty());
    assert_eq!(intervals.first().unwrap().start, created);
    assert_eq!(intervals.last().unwrap().end, end);
    for pair in intervals.windows(2) {
      assert_eq!(pair[0].end, pair[1].start);
    }
    let total: i64 = intervals.iter().map(|i| i.duration_ms).sum();
    assert_eq!(total, (end - created).num_milliseconds());
  }

  #[test]
  fn test_no_events_single_default_interval() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-05T00:00:00Z");
    let intervals = replay(created, &[], &[], created, None, now);
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].status, Status::Assigned);
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_label_added_opens_new_interval() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-10T00:00:00Z");
    let events = vec![added("in progress", "2026-03-03T12:00:00Z")];
    let intervals = replay(
      created,
      &events,
      &labels(&["in progress"]),
      at("2026-03-03T12:00:00Z"),
      None,
      now,
    );
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals[0].status, Status::Assigned);
    assert_eq!(intervals[1].status, Status::InProgress);
    assert_eq!(intervals[1].start, at("2026-03-03T12:00:00Z"));
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_removing_current_status_label_reverts_to_default() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-08T00:00:00Z");
    let events = vec![
      added("in review", "2026-03-02T00:00:00Z"),
      removed("in review", "2026-03-04T00:00:00Z"),
    ];
    let intervals = replay(created, &events, &[], at("2026-03-04T00:00:00Z"), None, now);
    assert_eq!(intervals.len(), 3);
    assert_eq!(intervals[1].status, Status::InReview);
    assert_eq!(intervals[2].status, Status::Assigned);
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_removing_other_label_is_ignored() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-08T00:00:00Z");
    let events = vec![
      added("in progress", "2026-03-02T00:00:00Z"),
      removed("bug", "2026-03-03T00:00:00Z"),
    ];
    let intervals = replay(
      created,
      &events,
      &labels(&["in progress"]),
      at("2026-03-03T00:00:00Z"),
      None,
      now,
    );
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals.last().unwrap().status, Status::InProgress);
  }

  #[test]
  fn test_closed_item_ends_at_closure() {
    let created = at("2026-03-01T00:00:00Z");
    let closed = at("2026-03-06T00:00:00Z");
    let now = at("2026-03-20T00:00:00Z");
    let events = vec![added("deployed", "2026-03-05T00:00:00Z")];
    let intervals = replay(
      created,
      &events,
      &labels(&["deployed"]),
      closed,
      Some(closed),
      now,
    );
    assert_eq!(intervals.last().unwrap().end, closed);
    assert_invariants(&intervals, created, closed);
  }

  #[test]
  fn test_reconciliation_synthesizes_missing_transition() {
    // Current labels say "in review" but no retained event ever added it.
    let created = at("2026-03-01T00:00:00Z");
    let updated = at("2026-03-04T00:00:00Z");
    let now = at("2026-03-07T00:00:00Z");
    let intervals = replay(created, &[], &labels(&["in review"]), updated, None, now);
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals[0].status, Status::Assigned);
    assert_eq!(intervals[1].status, Status::InReview);
    assert_eq!(intervals[1].start, updated);
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_label_added_at_creation_replaces_initial_status() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-02T00:00:00Z");
    let events = vec![added("in progress", "2026-03-01T00:00:00Z")];
    let intervals = replay(
      created,
      &events,
      &labels(&["in progress"]),
      created,
      None,
      now,
    );
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].status, Status::InProgress);
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_unordered_events_are_sorted() {
    let created = at("2026-03-01T00:00:00Z");
    let now = at("2026-03-09T00:00:00Z");
    let events = vec![
      added("in review", "2026-03-05T00:00:00Z"),
      added("in progress", "2026-03-02T00:00:00Z"),
    ];
    let intervals = replay(
      created,
      &events,
      &labels(&["in review"]),
      at("2026-03-05T00:00:00Z"),
      None,
      now,
    );
    let statuses: Vec<Status> = intervals.iter().map(|i| i.status).collect();
    assert_eq!(
      statuses,
      vec![Status::Assigned, Status::InProgress, Status::InReview]
    );
    assert_invariants(&intervals, created, now);
  }

  #[test]
  fn test_duration_sum_invariant_holds_for_busy_timeline() {
    let created = at("2026-03-01T06:30:00Z");
    let now = at("2026-03-11T18:45:12Z");
    let events = vec![
      added("in progress", "2026-03-02T09:00:00Z"),
      added("bug", "2026-03-02T09:30:00Z"),
      added("in review", "2026-03-04T17:00:00Z"),
      removed("in review", "2026-03-05T08:00:00Z"),
      added("in review", "2026-03-06T10:00:00Z"),
      added("ready for deploy", "2026-03-09T11:30:00Z"),
    ];
    let intervals = replay(
      created,
      &events,
      &labels(&["bug", "ready for deploy"]),
      at("2026-03-09T11:30:00Z"),
      None,
      now,
    );
    assert_invariants(&intervals, created, now);
  }
}
