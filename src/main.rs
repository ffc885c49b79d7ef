use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use marketsync::fetch::HttpFetcher;
use marketsync::http::{Method, Request};
use marketsync::notify::{Clients, NotificationOptions, Notifier, WindowClient};
use marketsync::{Config, Event, Outcome, Stores, Worker};

#[derive(Parser, Debug)]
#[command(name = "marketsync")]
#[command(about = "Offline-resilient request cache and bet outbox")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/marketsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the configured version's manifest
  Install,
  /// Evict other versions and make the configured one current
  Activate,
  /// Send one request through the cache policies
  Fetch {
    method: String,
    /// Origin-relative path or absolute URL
    path: String,
    /// Accept header, e.g. text/html for page navigations
    #[arg(long)]
    accept: Option<String>,
    /// Request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Connectivity restored: replay queued bets
  Sync {
    #[arg(default_value = "sync-bets")]
    tag: String,
  },
  /// Periodic refresh of the market listing
  PeriodicSync {
    #[arg(default_value = "update-markets")]
    tag: String,
  },
  /// Deliver a push payload
  Push { payload: String },
  /// Simulate a notification click
  Click {
    url: String,
    #[arg(long)]
    action: Option<String>,
  },
  /// List queued operations
  Queue,
  /// List cache namespaces
  Namespaces,
}

/// Prints notifications to stdout.
struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
  async fn show(&self, title: &str, options: &NotificationOptions) {
    println!("[notification] {}: {} ({})", title, options.body, options.url);
  }
}

/// A command-line process has no windows; opening one just prints the target.
struct HeadlessClients;

#[async_trait]
impl Clients for HeadlessClients {
  async fn windows(&self) -> Vec<WindowClient> {
    Vec::new()
  }

  async fn focus(&self, _id: &str) -> bool {
    false
  }

  async fn open(&self, url: &Url) {
    println!("open {}", url);
  }

  async fn claim(&self) {}
}

fn init_logging(log_dir: &Path) -> WorkerGuard {
  let file_appender = tracing_appender::rolling::daily(log_dir, "marketsync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_env("MARKETSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let log_dir = config
    .database_path()?
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(std::env::temp_dir);
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let _guard = init_logging(&log_dir);

  let stores = Stores::open(&config);
  let worker = Worker::new(
    config.clone(),
    stores.clone(),
    Arc::new(HttpFetcher::new()),
    Arc::new(StdoutNotifier),
    Arc::new(HeadlessClients),
  )?;

  let event = match args.command {
    Command::Queue => {
      for op in stores.queue.list_all()? {
        println!(
          "{}\t{}\t{}",
          op.id,
          op.created_at.to_rfc3339(),
          String::from_utf8_lossy(&op.payload)
        );
      }
      return Ok(());
    }
    Command::Namespaces => {
      for name in stores.cache.list_namespaces()? {
        println!("{}", name);
      }
      return Ok(());
    }
    Command::Install => Event::Install,
    Command::Activate => Event::Activate,
    Command::Fetch {
      method,
      path,
      accept,
      body,
    } => {
      let method: Method = method.parse()?;
      let url = config
        .resolve(&path)
        .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
      let mut request = Request::new(method, url);
      if let Some(accept) = accept {
        request = request.with_header("accept", accept);
      }
      if let Some(body) = body {
        request = request
          .with_header("content-type", "application/json")
          .with_body(body);
      }
      Event::Fetch(request)
    }
    Command::Sync { tag } => Event::Sync { tag },
    Command::PeriodicSync { tag } => Event::PeriodicSync { tag },
    Command::Push { payload } => Event::Push {
      data: payload.into_bytes(),
    },
    Command::Click { url, action } => Event::NotificationClick { action, url },
  };

  match worker.dispatch(event).await? {
    Outcome::Installed {
      install,
      activation,
    } => {
      println!("installed {} ({} assets)", install.version, install.assets);
      if let Some(activation) = activation {
        println!(
          "activated {}, evicted {:?}",
          activation.version, activation.evicted
        );
      }
    }
    Outcome::Activated(activation) => {
      println!(
        "activated {}, evicted {:?}",
        activation.version, activation.evicted
      );
    }
    Outcome::Served(served) => {
      println!("{} ({:?})", served.response.status, served.source);
      for (name, value) in &served.response.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", served.response.body_text());
      // Let a background refresh land before the process exits.
      if let Some(revalidation) = served.revalidation {
        revalidation.await?;
      }
    }
    Outcome::Replayed(report) => {
      println!(
        "attempted {}, delivered {}, still queued {}",
        report.attempted,
        report.delivered.len(),
        report.failed.len()
      );
    }
    Outcome::Refreshed { stored } => {
      println!("refreshed: {}", stored);
    }
    Outcome::Notified { title } => {
      println!("notified: {}", title);
    }
    Outcome::Clicked(outcome) => {
      println!("{:?}", outcome);
    }
    Outcome::Ignored => {
      println!("ignored");
    }
  }

  Ok(())
}
