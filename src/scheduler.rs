//! Background refresh scheduler.
//!
//! Periodically walks the tracked-repository list, refreshing each through
//! the cached client. Cycles are mutually exclusive via an explicit running
//! flag, skipped entirely when the remaining upstream quota sits at or below
//! the configured floor, and always return to idle — even when a cycle
//! unwinds — so the scheduler can never wedge.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::{Config, RefreshConfig};
use crate::forge::cached_client::CachedForgeClient;

/// What the scheduler refreshes each cycle. The cached client is the real
/// target; tests drive the scheduler with a scripted one.
pub trait RefreshTarget: Send + Sync {
  /// Last-seen remaining upstream request budget.
  fn remaining_quota(&self) -> i64;

  /// Refresh one repository's cached statistics.
  fn refresh_repo(&self, repo: &str) -> impl Future<Output = color_eyre::Result<()>> + Send;
}

impl RefreshTarget for CachedForgeClient {
  fn remaining_quota(&self) -> i64 {
    CachedForgeClient::remaining_quota(self)
  }

  async fn refresh_repo(&self, repo: &str) -> color_eyre::Result<()> {
    CachedForgeClient::refresh_repo(self, repo).await
  }
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  /// The cycle never started: quota floor reached or a cycle still running.
  Skipped,
  /// The cycle ran to completion over every repository.
  Completed { refreshed: usize, failed: usize },
}

/// Commands accepted by the running scheduler loop.
#[derive(Debug)]
pub enum SchedulerCommand {
  /// Run a cycle now instead of waiting for the next tick.
  RefreshNow,
  /// Stop the scheduler loop.
  Stop,
}

/// Handle for controlling the background scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
  tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
  pub async fn refresh_now(&self) -> color_eyre::Result<()> {
    self
      .tx
      .send(SchedulerCommand::RefreshNow)
      .await
      .map_err(|_| color_eyre::eyre::eyre!("Scheduler not running"))
  }

  pub async fn stop(&self) -> color_eyre::Result<()> {
    self
      .tx
      .send(SchedulerCommand::Stop)
      .await
      .map_err(|_| color_eyre::eyre::eyre!("Scheduler not running"))
  }
}

/// Restores the idle state when a cycle ends, normally or by unwinding.
struct IdleGuard(Arc<AtomicBool>);

impl Drop for IdleGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Sequential per-repository refresher with quota gating.
pub struct RefreshScheduler<T: RefreshTarget> {
  target: Arc<T>,
  repos: Vec<String>,
  interval: Duration,
  repo_delay: Duration,
  quota_floor: i64,
  running: Arc<AtomicBool>,
}

impl<T: RefreshTarget + 'static> RefreshScheduler<T> {
  pub fn new(target: Arc<T>, repos: Vec<String>, refresh: &RefreshConfig) -> Self {
    Self {
      target,
      repos,
      interval: Duration::from_secs(refresh.interval_secs),
      repo_delay: Duration::from_secs(refresh.repo_delay_secs),
      quota_floor: refresh.quota_floor,
      running: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn from_config(target: Arc<T>, config: &Config) -> Self {
    Self::new(target, config.repos.clone(), &config.refresh)
  }

  /// Run a single refresh cycle.
  ///
  /// Repositories are visited sequentially with a fixed inter-repo delay to
  /// spread upstream load; one repository's failure is logged and the loop
  /// continues to the next.
  pub async fn run_cycle(&self) -> CycleOutcome {
    let quota = self.target.remaining_quota();
    if quota <= self.quota_floor {
      warn!(
        quota,
        floor = self.quota_floor,
        "Skipping refresh cycle, remaining quota at or below floor"
      );
      return CycleOutcome::Skipped;
    }

    if self.running.swap(true, Ordering::SeqCst) {
      debug!("Previous refresh cycle still running, skipping");
      return CycleOutcome::Skipped;
    }
    let _guard = IdleGuard(Arc::clone(&self.running));

    let mut refreshed = 0;
    let mut failed = 0;

    for (index, repo) in self.repos.iter().enumerate() {
      if index > 0 && !self.repo_delay.is_zero() {
        time::sleep(self.repo_delay).await;
      }

      match self.target.refresh_repo(repo).await {
        Ok(()) => {
          debug!(repo = repo.as_str(), "Refreshed");
          refreshed += 1;
        }
        Err(e) => {
          warn!(repo = repo.as_str(), "Refresh failed: {}", e);
          failed += 1;
        }
      }
    }

    info!(refreshed, failed, "Refresh cycle complete");
    CycleOutcome::Completed { refreshed, failed }
  }

  /// Start the periodic background loop.
  ///
  /// Returns a handle for triggering an immediate cycle or stopping the loop.
  pub fn start(self) -> SchedulerHandle {
    let (tx, mut rx) = mpsc::channel::<SchedulerCommand>(16);

    tokio::spawn(async move {
      let mut ticker = time::interval(self.interval);
      // Consume the immediate first tick so startup isn't a thundering herd
      // against the upstream; the first real cycle runs one interval in.
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = ticker.tick() => {
            self.run_cycle().await;
          }
          cmd = rx.recv() => {
            match cmd {
              Some(SchedulerCommand::RefreshNow) => {
                self.run_cycle().await;
              }
              Some(SchedulerCommand::Stop) | None => {
                info!("Refresh scheduler stopping");
                break;
              }
            }
          }
        }
      }
    });

    SchedulerHandle { tx }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Mutex;

  struct FakeTarget {
    quota: i64,
    calls: AtomicUsize,
    refreshed: Mutex<Vec<String>>,
    fail_repo: Option<String>,
  }

  impl FakeTarget {
    fn new(quota: i64) -> Self {
      Self {
        quota,
        calls: AtomicUsize::new(0),
        refreshed: Mutex::new(Vec::new()),
        fail_repo: None,
      }
    }

    fn failing_on(quota: i64, repo: &str) -> Self {
      Self {
        fail_repo: Some(repo.to_string()),
        ..Self::new(quota)
      }
    }
  }

  impl RefreshTarget for FakeTarget {
    fn remaining_quota(&self) -> i64 {
      self.quota
    }

    async fn refresh_repo(&self, repo: &str) -> color_eyre::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_repo.as_deref() == Some(repo) {
        return Err(color_eyre::eyre::eyre!("boom"));
      }
      self.refreshed.lock().unwrap().push(repo.to_string());
      Ok(())
    }
  }

  fn quick_config() -> RefreshConfig {
    RefreshConfig {
      interval_secs: 3600,
      repo_delay_secs: 0,
      quota_floor: 250,
    }
  }

  #[tokio::test]
  async fn test_cycle_below_quota_floor_is_skipped() {
    let target = Arc::new(FakeTarget::new(100));
    let scheduler = RefreshScheduler::new(
      Arc::clone(&target),
      vec!["acme/api".to_string()],
      &quick_config(),
    );

    assert_eq!(scheduler.run_cycle().await, CycleOutcome::Skipped);
    assert_eq!(target.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cycle_at_exact_floor_is_skipped() {
    let target = Arc::new(FakeTarget::new(250));
    let scheduler =
      RefreshScheduler::new(Arc::clone(&target), vec!["r".to_string()], &quick_config());
    assert_eq!(scheduler.run_cycle().await, CycleOutcome::Skipped);
  }

  #[tokio::test]
  async fn test_one_repo_failure_does_not_stop_the_cycle() {
    let target = Arc::new(FakeTarget::failing_on(5000, "acme/broken"));
    let scheduler = RefreshScheduler::new(
      Arc::clone(&target),
      vec![
        "acme/api".to_string(),
        "acme/broken".to_string(),
        "acme/web".to_string(),
      ],
      &quick_config(),
    );

    let outcome = scheduler.run_cycle().await;
    assert_eq!(
      outcome,
      CycleOutcome::Completed {
        refreshed: 2,
        failed: 1
      }
    );
    assert_eq!(
      *target.refreshed.lock().unwrap(),
      vec!["acme/api".to_string(), "acme/web".to_string()]
    );
  }

  #[tokio::test]
  async fn test_cycles_are_mutually_exclusive() {
    let target = Arc::new(FakeTarget::new(5000));
    let scheduler = RefreshScheduler::new(
      Arc::clone(&target),
      vec!["acme/api".to_string()],
      &quick_config(),
    );

    // Simulate a cycle still in flight.
    scheduler.running.store(true, Ordering::SeqCst);
    assert_eq!(scheduler.run_cycle().await, CycleOutcome::Skipped);
    assert_eq!(target.calls.load(Ordering::SeqCst), 0);

    // Once the flag clears, cycles run again.
    scheduler.running.store(false, Ordering::SeqCst);
    assert!(matches!(
      scheduler.run_cycle().await,
      CycleOutcome::Completed { .. }
    ));
  }

  #[tokio::test]
  async fn test_idle_is_restored_after_a_cycle() {
    let target = Arc::new(FakeTarget::failing_on(5000, "acme/broken"));
    let scheduler = RefreshScheduler::new(
      Arc::clone(&target),
      vec!["acme/broken".to_string()],
      &quick_config(),
    );

    scheduler.run_cycle().await;
    assert!(!scheduler.running.load(Ordering::SeqCst));
  }
}
