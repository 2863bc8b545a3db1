//! Weight-marker extraction.
//!
//! Work items carry free-text numeric weight annotations like "P:12" or
//! "P(3)" in titles, bodies and label names. This is the single extraction
//! routine shared by every component that needs a workload score.

use regex::Regex;
use std::sync::OnceLock;

/// Marker: the letter P, one punctuation/space separator, then digits.
/// The separator is required so product codes like "HTTP2" never match.
const WEIGHT_PATTERN: &str = r"(?i)\bp\s*[:=(\[\-]\s*(\d+)";

fn weight_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(WEIGHT_PATTERN).expect("weight pattern is valid"))
}

/// Sum of all weight markers in `text`. Empty or absent text weighs 0.
pub fn extract_weight(text: Option<&str>) -> u32 {
  let text = match text {
    Some(t) if !t.is_empty() => t,
    _ => return 0,
  };

  weight_re()
    .captures_iter(text)
    .filter_map(|c| c.get(1))
    .filter_map(|m| m.as_str().parse::<u32>().ok())
    .fold(0u32, |acc, w| acc.saturating_add(w))
}

/// Total weight of a work item: title, body and every label name summed.
pub fn item_weight(title: &str, body: Option<&str>, labels: &[String]) -> u32 {
  let mut total = extract_weight(Some(title));
  total = total.saturating_add(extract_weight(body));
  for label in labels {
    total = total.saturating_add(extract_weight(Some(label)));
  }
  total
}
