//! Typed upstream failure taxonomy.

use thiserror::Error;

/// Errors from the forge query API.
///
/// Cloneable by design: coalesced callers all receive the identical failure,
/// so the error travels through broadcast channels as a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForgeError {
  /// Connection-level failure; retried only by the next cycle or caller.
  #[error("upstream request failed: {0}")]
  Transport(String),

  /// The bounded per-request timeout elapsed.
  #[error("upstream request timed out: {0}")]
  Timeout(String),

  /// Entity does not exist upstream.
  #[error("not found: {0}")]
  NotFound(String),

  /// Token rejected or insufficient permissions.
  #[error("authorization failed: {0}")]
  Unauthorized(String),

  /// Upstream rejected the query itself.
  #[error("malformed query rejected by upstream: {0}")]
  BadQuery(String),

  /// The remaining-quota signal hit zero.
  #[error("upstream quota exhausted")]
  QuotaExhausted,

  /// Response body did not match the expected shape.
  #[error("failed to decode upstream response: {0}")]
  Decode(String),
}

impl ForgeError {
  /// Transport-class errors: the system cannot verify freshness, so callers
  /// may fall back to stale data. Query-class errors never qualify.
  pub fn is_transport(&self) -> bool {
    matches!(self, ForgeError::Transport(_) | ForgeError::Timeout(_))
  }
}

impl From<reqwest::Error> for ForgeError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      ForgeError::Timeout(e.to_string())
    } else if e.is_decode() {
      ForgeError::Decode(e.to_string())
    } else {
      ForgeError::Transport(e.to_string())
    }
  }
}
