mod background;
mod cache;
mod config;
mod controller;
mod error;
mod http;
mod retry;
mod router;
mod strategy;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::{CacheStorage, MemoryStorage, Purpose, SqliteStorage};
use crate::config::{Config, StorageKind};
use crate::controller::Controller;
use crate::http::{HttpFetcher, Request};

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "An offline-first request cache with per-origin caching strategies")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/precache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the static namespace with the bootstrap resources
  Install,
  /// Delete caches of other versions and take over request handling
  Activate,
  /// Fetch a URL through the cache
  Fetch {
    url: String,
    /// HTTP method; anything but GET bypasses the caches
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Pull URLs into the cache, retrying failures
  Warm {
    #[arg(required = true)]
    urls: Vec<String>,
    #[arg(long, default_value_t = retry::DEFAULT_ATTEMPTS)]
    attempts: usize,
  },
  /// List physical caches
  Caches,
  /// List entries of a namespace, oldest first
  Keys {
    #[arg(value_enum, default_value_t = Purpose::Static)]
    namespace: Purpose,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose, args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let storage = open_storage(&config)?;
  let fetcher = Arc::new(HttpFetcher::new(&config.user_agent, config.request_timeout())?);
  let controller = Controller::new(config.controller_settings()?, storage, fetcher);

  run(&controller, args.command).await
}

fn init_logging(
  verbose: bool,
  log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("precache=debug")
    } else {
      EnvFilter::new("precache=info")
    }
  });

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}

fn open_storage(config: &Config) -> Result<Arc<dyn CacheStorage>> {
  let storage: Arc<dyn CacheStorage> = match config.storage {
    StorageKind::Sqlite => Arc::new(SqliteStorage::open(&config.database_path()?)?),
    StorageKind::Memory => Arc::new(MemoryStorage::new()),
  };
  Ok(storage)
}

async fn run(controller: &Controller, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      controller.install().await?;
      println!(
        "installed ({}{})",
        controller.state(),
        if controller.skips_waiting() { ", skip waiting" } else { "" }
      );
    }
    Command::Activate => {
      if !controller.resume().await? {
        return Err(eyre!("Nothing installed for this version; run `precache install` first"));
      }
      let activation = controller.activate().await?;
      for name in &activation.deleted {
        println!("deleted {}", name);
      }
      for name in &activation.failed {
        println!("failed to delete {}", name);
      }
    }
    Command::Fetch {
      url,
      method,
      output,
    } => {
      controller.start().await?;
      let request = Request::get(&url)?.with_method(&method);
      let route = controller.route(&request);
      let response = controller.handle(&request).await?;
      // Let background cache writes land before the process exits
      controller.tasks().drain().await;

      eprintln!(
        "{} {} via {} ({})",
        response.status,
        request.url,
        route,
        response.header("content-type").unwrap_or("-")
      );
      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout().write_all(&response.body)?,
      }
      response.error_for_status()?;
    }
    Command::Warm { urls, attempts } => {
      controller.start().await?;
      let mut failed = 0;
      for url in &urls {
        let request = Request::get(url)?;
        let result = retry::with_retries(attempts, Duration::from_millis(500), url, || {
          let request = &request;
          async move { controller.handle(request).await?.error_for_status() }
        })
        .await;
        match result {
          Ok(response) => info!(url = url.as_str(), bytes = response.body.len(), "warmed"),
          Err(e) => {
            eprintln!("{}: {}", url, e);
            failed += 1;
          }
        }
      }
      controller.tasks().drain().await;
      if controller.tasks().failures() > 0 {
        info!(failures = controller.tasks().failures(), "some cache updates were dropped");
      }
      if failed > 0 {
        return Err(eyre!("{} of {} URLs could not be fetched", failed, urls.len()));
      }
    }
    Command::Caches => {
      let registry = controller.registry();
      for name in controller.storage().cache_names().await? {
        match registry.iter().find(|ns| ns.physical_name == name) {
          Some(ns) => println!("* {} ({})", name, ns.purpose),
          None => println!("  {} (stale)", name),
        }
      }
    }
    Command::Keys { namespace } => {
      let cache = controller.registry().handle(controller.storage(), namespace);
      for key in cache.keys().await? {
        println!("{}", key);
      }
    }
  }

  Ok(())
}
