//! Request coalescing: at most one in-flight producer per cache key.
//!
//! N concurrent callers for the same key share a single producer run and all
//! observe the identical settled value, success or failure. Once settled, the
//! key starts fresh for the next caller — a failed run never poisons the key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Coalesces concurrent identical requests into one upstream call.
///
/// `V` is the settled value broadcast to every waiter; it carries errors as
/// values (e.g. `Result<T, E>` with a cloneable error) so that failures
/// propagate identically to all callers.
pub struct RequestCoalescer<V> {
  pending: Mutex<HashMap<String, broadcast::Sender<V>>>,
}

impl<V> Default for RequestCoalescer<V> {
  fn default() -> Self {
    Self::new()
  }
}

/// Removes the pending entry if the leader unwinds before settling, so
/// waiters see a closed channel and retry instead of hanging forever.
struct SettleGuard<'a, V> {
  pending: &'a Mutex<HashMap<String, broadcast::Sender<V>>>,
  key: &'a str,
  armed: bool,
}

impl<V> Drop for SettleGuard<'_, V> {
  fn drop(&mut self) {
    if self.armed {
      let mut pending = self
        .pending
        .lock()
        .unwrap_or_else(|e| e.into_inner());
      pending.remove(self.key);
    }
  }
}

impl<V> RequestCoalescer<V> {
  pub fn new() -> Self {
    Self {
      pending: Mutex::new(HashMap::new()),
    }
  }

  /// Number of keys with an in-flight producer (diagnostics only).
  pub fn in_flight(&self) -> usize {
    self
      .pending
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .len()
  }
}

impl<V: Clone> RequestCoalescer<V> {
  /// Run `producer` for `key`, unless a run for the same key is already in
  /// flight — in that case await and return that run's result instead.
  pub async fn coalesce<F, Fut>(&self, key: &str, producer: F) -> V
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = V>,
  {
    let mut producer = Some(producer);

    loop {
      let waiter = {
        let mut pending = self
          .pending
          .lock()
          .unwrap_or_else(|e| e.into_inner());
        match pending.get(key) {
          Some(tx) => Some(tx.subscribe()),
          None => {
            let (tx, _) = broadcast::channel(1);
            pending.insert(key.to_string(), tx);
            None
          }
        }
      };

      match waiter {
        Some(mut rx) => {
          match rx.recv().await {
            Ok(value) => return value,
            // Leader unwound without settling; start over.
            Err(_) => continue,
          }
        }
        None => {
          let mut guard = SettleGuard {
            pending: &self.pending,
            key,
            armed: true,
          };

          let producer = producer.take().expect("producer consumed once");
          let value = producer().await;

          // Remove the key before broadcasting so a caller arriving after
          // settlement starts a fresh run rather than receiving this one.
          let tx = {
            let mut pending = self
              .pending
              .lock()
              .unwrap_or_else(|e| e.into_inner());
            pending.remove(key)
          };
          guard.armed = false;
          if let Some(tx) = tx {
            // No receivers just means nobody raced us.
            let _ = tx.send(value.clone());
          }
          return value;
        }
      }
    }
  }
}
