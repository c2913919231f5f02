use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use offcache::cache::CacheStorage;
use offcache::config::Config;
use offcache::{
  EventHandler, HttpFetcher, InstallOutcome, LocalHost, OfflineCacheAgent, Request, RequestMode,
  SqliteStorage,
};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Cache-first offline agent for small web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcache.yaml or $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app is served from
  #[arg(long)]
  origin: Option<String>,

  /// Cache database path
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest
  Install,
  /// Delete every cache but the current one
  Activate,
  /// Answer a request cache-first; body goes to stdout
  Fetch {
    /// Absolute URL, or a path relative to the origin
    url: String,
    /// Extra request header, as `name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request mode: same-origin, cors, no-cors or navigate
    #[arg(long, default_value = "cors")]
    mode: RequestMode,
    #[arg(long, default_value = "GET")]
    method: Method,
  },
  /// List caches and what they hold
  Caches,
  /// Post a JSON message to the agent
  Message { json: String },
  /// Deliver a push event; the notification is printed as JSON
  Push { data: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offcache=info")),
    )
    .with_writer(writer)
    .init();

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override from command line
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(db) = args.db {
    config.cache.db_path = Some(db);
  }

  let origin = config.origin_url()?;
  let agent = OfflineCacheAgent::new(
    config.agent_config()?,
    SqliteStorage::open(&config.db_path()?)?,
    HttpFetcher::new(&origin)?,
    LocalHost::new(),
  );
  let worker = EventHandler::spawn(agent.clone());

  match args.command {
    Command::Install => match worker.install().await? {
      InstallOutcome::Populated { assets } => {
        println!("cached {} assets in {}", assets, agent.config().cache_name)
      }
      InstallOutcome::Failed { reason } => println!("install finished without cache: {}", reason),
    },
    Command::Activate => {
      let report = worker.activate().await?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      for name in &report.failed {
        println!("failed to delete {}", name);
      }
    }
    Command::Fetch {
      url,
      headers,
      mode,
      method,
    } => {
      let url = origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let mut request = Request::get(url).with_method(method).with_mode(mode);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must look like 'name: value': {}", header))?;
        request = request.with_header(name.trim(), value.trim())?;
      }

      let result = worker.fetch(request).await?;
      eprintln!(
        "{} {} ({:?})",
        result.response.status, result.response.status_text, result.source
      );
      std::io::stdout().write_all(&result.response.body)?;

      // The process is about to exit; let the background write land
      if let Some(write) = result.cache_write {
        write.await?;
      }
    }
    Command::Caches => {
      let storage = agent.storage();
      for name in storage.cache_names()? {
        let current = if name == agent.config().cache_name { " (current)" } else { "" };
        println!("{}{}", name, current);
        for entry in storage.entries(&name)? {
          println!("  {} {}", entry.response.status, entry.url);
        }
      }
    }
    Command::Message { json } => {
      let data: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
      if worker.post_message(data).await? {
        println!("skip waiting: {}", agent.host().skip_waiting_requested());
      } else {
        println!("message ignored");
      }
    }
    Command::Push { data } => {
      if let Some(notification) = worker.push(data.map(Bytes::from)).await? {
        println!("{}", serde_json::to_string_pretty(&notification)?);
      }
    }
  }

  Ok(())
}
