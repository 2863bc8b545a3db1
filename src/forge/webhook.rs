//! Signed cache-invalidation events.
//!
//! The forge pushes an HMAC-SHA256-signed payload when a tracked repository
//! changes; a verified event clears that repository's period-scoped cache
//! entries. The HTTP endpoint receiving the event lives outside this crate —
//! it hands the raw body and signature header straight in here.

use color_eyre::{eyre::eyre, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::info;

use super::cached_client::CachedForgeClient;

type HmacSha256 = Hmac<Sha256>;

/// Signature header format: "sha256=<hex digest>".
const SIGNATURE_PREFIX: &str = "sha256=";

/// Payload of an invalidation event.
#[derive(Debug, Deserialize)]
pub struct InvalidationEvent {
  pub repo: String,
}

/// Verify an event signature against the shared secret.
///
/// Comparison runs in constant time via the MAC verifier.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
  let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
    return false;
  };
  let Ok(digest) = hex::decode(hex_digest) else {
    return false;
  };

  let mut mac =
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
  mac.update(payload);
  mac.verify_slice(&digest).is_ok()
}

/// Sign a payload the way the forge does (used by tests and local tooling).
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
  let mut mac =
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
  mac.update(payload);
  format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Verify and apply an invalidation event.
///
/// Returns the number of cache entries cleared. Rejected signatures and
/// malformed payloads are errors; nothing is invalidated for them.
pub fn process_event(
  client: &CachedForgeClient,
  secret: &str,
  signature: &str,
  payload: &[u8],
) -> Result<u64> {
  if !verify_signature(secret, payload, signature) {
    return Err(eyre!("Invalid event signature"));
  }

  let event: InvalidationEvent = serde_json::from_slice(payload)
    .map_err(|e| eyre!("Failed to parse invalidation event: {}", e))?;

  info!(repo = event.repo.as_str(), "Processing invalidation event");
  Ok(client.invalidate_repo(&event.repo))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_signature_round_trip() {
    let payload = br#"{"repo": "acme/api"}"#;
    let signature = sign_payload("s3cret", payload);
    assert!(signature.starts_with("sha256="));
    assert!(verify_signature("s3cret", payload, &signature));
  }

  #[test]
  fn test_tampered_payload_is_rejected() {
    let payload = br#"{"repo": "acme/api"}"#;
    let signature = sign_payload("s3cret", payload);
    assert!(!verify_signature("s3cret", br#"{"repo": "acme/web"}"#, &signature));
    assert!(!verify_signature("other-secret", payload, &signature));
  }

  #[test]
  fn test_malformed_signatures_are_rejected() {
    let payload = b"{}";
    assert!(!verify_signature("s", payload, "md5=abcdef"));
    assert!(!verify_signature("s", payload, "sha256=not-hex"));
    assert!(!verify_signature("s", payload, ""));
  }
}
