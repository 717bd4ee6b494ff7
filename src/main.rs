mod cache;
mod config;
mod event;
mod nav;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{CacheSource, CacheStorage, SqliteStorage};
use config::Config;
use nav::{BottomNavigation, Navigation};
use net::{HttpNetwork, Network, OfflineNetwork, Request};
use worker::{Host, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline-first service worker cache for a web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prime the static cache and activate when allowed
  Install,
  /// Drop stale cache generations and claim pages
  Activate,
  /// Fetch a URL or path the way a page would
  Fetch {
    /// Absolute URL or path relative to the origin
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Extra request header ("Name: value"), repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Pretend the network is unreachable
    #[arg(long)]
    offline: bool,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Post a JSON message to the worker, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Show the registration and cache generations
  Status {
    /// Also list the request keys stored in each cache
    #[arg(long)]
    entries: bool,
  },
  /// Bottom navigation state
  Nav {
    #[command(subcommand)]
    command: NavCommand,
  },
}

#[derive(Subcommand, Debug)]
enum NavCommand {
  /// List nav items for a page
  Show {
    #[arg(long, default_value = "/")]
    path: String,
  },
  /// Click a nav item (by action, href or label)
  Click {
    item: String,
    #[arg(long, default_value = "/")]
    path: String,
  },
  /// Set the badge count on a nav item; 0 removes it
  Badge { action: String, count: u32 },
  /// Show the notification dot on a nav item
  Notify {
    action: String,
    /// Hide the dot instead
    #[arg(long)]
    off: bool,
  },
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default "warn"). When the config names a log
/// file, events are also written there; keep the guard alive until exit.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  let stderr_layer = fmt::layer().with_writer(io::stderr);

  match &config.log.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(filter)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(stderr_layer)
        .with(filter)
        .init();
      Ok(None)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config)?;

  let storage = Arc::new(SqliteStorage::open(config.cache.path.as_deref())?);
  info!(origin = %config.origin, version = %config.cache.version, "swcache starting");

  match args.command {
    Command::Nav { command } => run_nav(&config, storage, command),
    command @ Command::Fetch { offline: true, .. } => {
      run_worker(&config, storage, Arc::new(OfflineNetwork), command).await
    }
    command => {
      let network = Arc::new(HttpNetwork::new(&config.network)?);
      run_worker(&config, storage, network, command).await
    }
  }
}

async fn run_worker<N: Network>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
  command: Command,
) -> Result<()> {
  let worker = ServiceWorker::new(config, Arc::clone(&storage), Arc::clone(&network))?;
  let host = Host::new(Arc::new(worker), network);

  match command {
    Command::Install => {
      let (report, activation) = host.install().await?;
      println!("Installed {} ({} assets)", report.cache_name, report.assets);
      match activation {
        Some(activation) => print_activation(&activation),
        None => println!("Waiting for activation (send SKIP_WAITING to activate now)"),
      }
    }
    Command::Activate => {
      let activation = host.activate().await?;
      print_activation(&activation);
    }
    Command::Fetch {
      target,
      method,
      headers,
      output,
      ..
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = Request::new(method, config.resolve(&target)?);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header {:?}, expected \"Name: value\"", header))?;
        request = request.with_header(name.trim(), value.trim());
      }

      let result = host.fetch(request).await;
      // Background refreshes complete into the cache even though we are done
      host.shutdown().await;
      let result = result?;

      let content_type = result.data.header("content-type").unwrap_or("-");
      match (result.source, result.cached_at) {
        (CacheSource::Network, _) | (_, None) => {
          eprintln!("{} {} ({})", result.data.status, content_type, result.source)
        }
        (source, Some(stored_at)) => eprintln!(
          "{} {} ({}, stored {})",
          result.data.status,
          content_type,
          source,
          stored_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
      }
      match output {
        Some(path) => std::fs::write(&path, &result.data.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => io::stdout().write_all(&result.data.body)?,
      }
    }
    Command::Message { json } => match host.post_message(&json).await? {
      Some(activation) => print_activation(&activation),
      None => println!("Message delivered"),
    },
    Command::Status { entries } => {
      let registration = host.registration()?;
      println!("Version:     {}", host.worker().version());
      println!("Phase:       {:?}", host.worker().phase());
      println!(
        "Active:      {}",
        registration.active.as_deref().unwrap_or("-")
      );
      println!(
        "Waiting:     {}",
        registration.waiting.as_deref().unwrap_or("-")
      );
      println!("Controlling: {}", registration.controlling);
      println!("Caches:");
      for (name, count) in storage.entry_counts()? {
        let marker = if host.worker().generations().is_current(&name) {
          ""
        } else {
          " (stale)"
        };
        println!("  {:<20} {:>5} entries{}", name, count, marker);
        if entries {
          for key in storage.entry_keys(&name)? {
            println!("      {}", key);
          }
        }
      }
    }
    Command::Nav { .. } => return Err(eyre!("Nav commands do not run the worker")),
  }

  Ok(())
}

fn print_activation(activation: &worker::ActivationReport) {
  println!("Activated {}", activation.version);
  for name in &activation.removed {
    println!("  removed {}", name);
  }
}

fn ensure_nav_action(nav: &BottomNavigation<SqliteStorage>, action: &str) -> Result<()> {
  if nav
    .items()
    .iter()
    .any(|item| item.action.as_deref() == Some(action))
  {
    Ok(())
  } else {
    Err(eyre!("No nav item with action {}", action))
  }
}

fn run_nav(config: &Config, storage: Arc<SqliteStorage>, command: NavCommand) -> Result<()> {
  match command {
    NavCommand::Show { path } => {
      let nav = BottomNavigation::init(&config.nav.items, storage, &path)?;
      for item in nav.items() {
        let marker = if item.active { "*" } else { " " };
        let dot = if item.notification { "\u{2022}" } else { " " };
        let badge = item.badge.as_deref().unwrap_or("");
        println!(
          "{} {:<12} {:<12} {} {}",
          marker,
          item.label,
          item.href.as_deref().unwrap_or("-"),
          dot,
          badge
        );
      }
    }
    NavCommand::Click { item, path } => {
      let mut nav = BottomNavigation::init(&config.nav.items, storage, &path)?;
      let index = nav
        .find(&item)
        .ok_or_else(|| eyre!("No nav item named {}", item))?;
      match nav.handle_click(index)? {
        Navigation::To(target) => println!("{}", target),
        Navigation::Stay => println!("(no navigation)"),
      }
    }
    NavCommand::Badge { action, count } => {
      let mut nav = BottomNavigation::new(&config.nav.items, storage);
      ensure_nav_action(&nav, &action)?;
      nav.set_badge(&action, count)?;
    }
    NavCommand::Notify { action, off } => {
      let mut nav = BottomNavigation::new(&config.nav.items, storage);
      ensure_nav_action(&nav, &action)?;
      nav.set_notification(&action, !off)?;
    }
  }
  Ok(())
}
