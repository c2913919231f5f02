//! offcache - a cache-first offline agent for small web apps.
//!
//! The agent pre-caches a fixed asset manifest on install, purges stale cache generations on
//! activation, and answers requests from cache first, then the network, then a fixed offline
//! response. Storage, network and the hosting registration are traits so the agent can run
//! against SQLite and reqwest natively, or against in-memory stand-ins.
//!
//! # Example
//!
//! ```no_run
//! use offcache::{EventHandler, HttpFetcher, LocalHost, OfflineCacheAgent, Request, SqliteStorage};
//!
//! # async fn example() -> color_eyre::Result<()> {
//! let config = offcache::Config::load(None)?;
//! let agent = OfflineCacheAgent::new(
//!   config.agent_config()?,
//!   SqliteStorage::open(&config.db_path()?)?,
//!   HttpFetcher::new(&config.origin_url()?)?,
//!   LocalHost::new(),
//! );
//!
//! let worker = EventHandler::spawn(agent);
//! worker.install().await?;
//! worker.activate().await?;
//!
//! let result = worker.fetch(Request::get(config.origin_url()?.join("/index.html")?)).await?;
//! println!("{} via {:?}", result.response.status, result.source);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod event;
pub mod host;
pub mod http;
pub mod net;

pub use agent::{
  ActivateReport, AgentConfig, FetchResult, InstallOutcome, OfflineCacheAgent, ResponseSource,
};
pub use cache::{CacheStorage, MemoryStorage, SqliteStorage};
pub use config::Config;
pub use event::{EventHandler, WorkerEvent, WorkerHandle};
pub use host::{LocalHost, Notification, WorkerHost};
pub use http::{Request, RequestMode, Response, ResponseType};
pub use net::{Fetcher, HttpFetcher};
