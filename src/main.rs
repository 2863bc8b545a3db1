use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use forgeboard::config::Config;
use forgeboard::forge::CachedForgeClient;
use forgeboard::scheduler::RefreshScheduler;
use forgeboard::stats::Period;

#[derive(Parser, Debug)]
#[command(name = "forgeboard")]
#[command(about = "Sync and caching daemon for code-forge dashboards")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/forgeboard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Print one repository's statistics as JSON and exit
  #[arg(short, long)]
  repo: Option<String>,

  /// Period filter for --repo: today, yesterday, this-week, last-week,
  /// this-month or month-MM-YYYY (default: today)
  #[arg(short, long)]
  period: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config);

  let client = Arc::new(CachedForgeClient::new(&config)?);

  // One-shot mode: print statistics for a single repository.
  if let Some(repo) = args.repo {
    let period = Period::parse(args.period.as_deref())?;
    let (issues, commits) = futures::future::try_join(
      client.issue_stats(&repo, period),
      client.commit_stats(&repo, period),
    )
    .await?;

    let payload = serde_json::json!({
      "repo": repo,
      "period": period.cache_token(),
      "issues": issues,
      "commits": commits,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    return Ok(());
  }

  if config.repos.is_empty() {
    return Err(eyre!(
      "No repositories configured; add a `repos:` list to the config file."
    ));
  }

  // Daemon mode: periodic background refresh until Ctrl-C.
  let scheduler = RefreshScheduler::from_config(Arc::clone(&client), &config);
  let handle = scheduler.start();
  handle.refresh_now().await?;

  info!(repos = config.repos.len(), "forgeboard daemon running");
  tokio::signal::ctrl_c().await?;
  handle.stop().await?;

  Ok(())
}

/// Initialize tracing: stderr always, plus a daily-rolling file when a log
/// directory is configured. The returned guard must outlive the daemon so
/// buffered log lines are flushed.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "forgeboard.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
