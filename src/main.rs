use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hybridgate::{ConfigPatch, DataContext, StorageMode};

#[derive(Parser, Debug)]
#[command(name = "hybridgate")]
#[command(about = "Inspect and drive the admin console's hybrid data layer")]
#[command(version)]
struct Cli {
  /// Path to the SQLite store (default: $XDG_DATA_HOME/hybridgate/store.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Also write logs to a daily-rolling file in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource through the current mode
  Get { key: String },
  /// Write a JSON payload under a key
  Save { key: String, payload: String },
  /// Replay queued writes against the remote
  Drain,
  /// Show or change the storage mode (local, api, hybrid)
  Mode { mode: Option<StorageMode> },
  /// Show or edit connection settings
  #[command(subcommand)]
  Config(ConfigCommand),
  /// List writes waiting for replay
  Queue,
  /// List cached keys
  Keys,
  /// Drop the cached entry for a key
  Forget { key: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
  /// Print the current settings with secrets hidden
  Show,
  /// Update settings; an empty value clears a credential
  Set(ConfigSetArgs),
}

#[derive(Args, Debug)]
struct ConfigSetArgs {
  #[arg(long)]
  base_url: Option<String>,
  /// Per-request timeout in milliseconds
  #[arg(long)]
  timeout: Option<u64>,
  #[arg(long)]
  retries: Option<u32>,
  /// Base backoff in milliseconds
  #[arg(long)]
  retry_delay: Option<u64>,
  /// Cache freshness window in milliseconds
  #[arg(long)]
  cache_ttl: Option<u64>,
  #[arg(long)]
  session_cookie: Option<String>,
  #[arg(long)]
  token: Option<String>,
  #[arg(long)]
  api_key: Option<String>,
  #[arg(long)]
  username: Option<String>,
  #[arg(long)]
  password: Option<String>,
  #[arg(long)]
  http_user: Option<String>,
  #[arg(long)]
  http_password: Option<String>,
}

impl From<ConfigSetArgs> for ConfigPatch {
  fn from(args: ConfigSetArgs) -> Self {
    ConfigPatch {
      api_base_url: args.base_url,
      api_timeout: args.timeout,
      retry_attempts: args.retries,
      retry_delay: args.retry_delay,
      cache_ttl: args.cache_ttl,
      session_cookie: args.session_cookie,
      api_token: args.token,
      api_key: args.api_key,
      api_username: args.username,
      api_password: args.password,
      http_auth_user: args.http_user,
      http_auth_password: args.http_password,
      ..ConfigPatch::default()
    }
  }
}

/// Log to stderr, filtered by RUST_LOG (default `warn`), plus an optional
/// daily file. The returned guard must live until exit to flush the file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "hybridgate.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .init();

  guard
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();
  let _log_guard = init_tracing(cli.log_dir.as_deref());

  let context = match &cli.db {
    Some(path) => DataContext::open(path),
    None => DataContext::open_default(),
  }
  .wrap_err("Failed to open data store")?;
  let facade = context.facade();

  match cli.command {
    Command::Get { key } => match facade.read::<Value>(&key).await? {
      Some(result) => {
        match result.cached_at {
          Some(at) => eprintln!(
            "source: {} (cached {})",
            result.source,
            at.format("%Y-%m-%d %H:%M:%S UTC")
          ),
          None => eprintln!("source: {}", result.source),
        }
        print_json(&result.data)?;
      }
      None => eprintln!("No cached entry for '{}'", key),
    },

    Command::Save { key, payload } => {
      let payload: Value =
        serde_json::from_str(&payload).wrap_err("Payload is not valid JSON")?;
      let outcome = facade.write(&key, &payload).await?;
      println!(
        "local: {}  remote: {}  queued: {}",
        outcome.committed_locally, outcome.committed_remotely, outcome.queued
      );
    }

    Command::Drain => {
      let report = facade.drain_and_replay().await?;
      println!("synced: {}  remaining: {}", report.synced, report.remaining);
    }

    Command::Mode { mode: None } => println!("{}", facade.mode()),
    Command::Mode { mode: Some(mode) } => {
      facade.set_mode(mode)?;
      println!("{}", mode);
    }

    Command::Config(ConfigCommand::Show) => {
      print_json(&serde_json::to_value(context.config().get().redacted())?)?;
    }
    Command::Config(ConfigCommand::Set(args)) => {
      let patch = ConfigPatch::from(args);
      if patch.is_empty() {
        eprintln!("Nothing to change");
      } else {
        let record = context.config().save(&patch)?;
        info!("Config updated");
        print_json(&serde_json::to_value(record.redacted())?)?;
      }
    }

    Command::Queue => {
      let items = facade.queue().items()?;
      if items.is_empty() {
        println!("Queue is empty");
      }
      for item in items {
        println!(
          "{}  {}  {}  attempts={}{}",
          item.timestamp.format("%Y-%m-%d %H:%M:%S"),
          item.key,
          item.endpoint,
          item.attempts,
          item
            .last_error
            .map(|e| format!("  last_error={}", e))
            .unwrap_or_default()
        );
      }
    }

    Command::Keys => {
      let cache = facade.cache();
      let now = cache.now();
      for key in cache.keys()? {
        match cache.read::<Value>(&key)? {
          Some(entry) => println!("{}  {}", key, entry.age_display(now)),
          None => println!("{}  (unreadable)", key),
        }
      }
    }

    Command::Forget { key } => {
      if facade.invalidate(&key)? {
        println!("Forgot '{}'", key);
      } else {
        println!("No cached entry for '{}'", key);
      }
    }
  }

  Ok(())
}
