//! The offline cache agent and its event handlers.
//!
//! The agent owns one versioned cache. Install fills it from the asset manifest, activate removes
//! every other cache, and fetch serves from cache first and falls back to the network.

mod activate;
mod fetch;
mod install;
mod message;
mod push;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use url::Url;

use crate::cache::CacheStorage;
use crate::host::WorkerHost;
use crate::net::Fetcher;

pub use activate::ActivateReport;
pub use fetch::{is_cacheable, FetchResult, ResponseSource};
pub use install::InstallOutcome;
pub use message::WorkerMessage;
pub use push::notification;

/// Immutable settings the agent is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
  /// Version tag naming the current cache
  pub cache_name: String,
  /// Assets to pre-cache on install, in order
  pub assets: Vec<Url>,
  /// Body of the offline fallback response
  pub offline_message: String,
}

impl AgentConfig {
  /// Resolve asset paths against `origin`.
  pub fn new(
    origin: &Url,
    cache_name: impl Into<String>,
    assets: &[String],
    offline_message: impl Into<String>,
  ) -> Result<Self> {
    let assets = assets
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      cache_name: cache_name.into(),
      assets,
      offline_message: offline_message.into(),
    })
  }
}

/// Cache-first offline agent.
pub struct OfflineCacheAgent<S, F, H> {
  config: Arc<AgentConfig>,
  storage: Arc<S>,
  fetcher: Arc<F>,
  host: Arc<H>,
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  pub fn new(config: AgentConfig, storage: S, fetcher: F, host: H) -> Self {
    Self {
      config: Arc::new(config),
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      host: Arc::new(host),
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  pub fn host(&self) -> &H {
    &self.host
  }
}

impl<S, F, H> Clone for OfflineCacheAgent<S, F, H> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      host: Arc::clone(&self.host),
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted collaborators for agent tests.

  use async_trait::async_trait;
  use bytes::Bytes;
  use color_eyre::{eyre::eyre, Result};
  use std::collections::{HashMap, HashSet};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use url::Url;

  use super::{AgentConfig, OfflineCacheAgent};
  use crate::cache::{CacheEntry, CacheStorage, MemoryStorage};
  use crate::host::LocalHost;
  use crate::http::{Request, Response, ResponseType};
  use crate::net::Fetcher;

  pub const ORIGIN: &str = "http://localhost:8000";
  pub const CACHE_NAME: &str = "time-calculator-v1.0";

  pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  /// A same-origin 200 response as the network would return it.
  pub fn page(path: &str, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(200, body);
    response.response_type = ResponseType::Basic;
    response.url = Some(url(path));
    response
  }

  /// Fetcher answering from a fixed table; unknown URLs and `offline` mode are network errors.
  #[derive(Default)]
  pub struct StubFetcher {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl StubFetcher {
    pub fn route(&self, url: &Url, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", request.url))
    }
  }

  /// In-memory storage whose operations can be made to fail.
  #[derive(Default)]
  pub struct FailingStorage {
    inner: MemoryStorage,
    undeletable: Mutex<HashSet<String>>,
    lookups_fail: AtomicBool,
    writes_fail: AtomicBool,
  }

  impl FailingStorage {
    pub fn fail_delete(&self, name: &str) {
      self.undeletable.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_lookups(&self) {
      self.lookups_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
      self.writes_fail.store(true, Ordering::SeqCst);
    }
  }

  impl CacheStorage for FailingStorage {
    fn open(&self, name: &str) -> Result<()> {
      self.inner.open(name)
    }

    fn has(&self, name: &str) -> Result<bool> {
      self.inner.has(name)
    }

    fn cache_names(&self) -> Result<Vec<String>> {
      self.inner.cache_names()
    }

    fn delete_cache(&self, name: &str) -> Result<bool> {
      if self.undeletable.lock().unwrap().contains(name) {
        return Err(eyre!("cache {} is locked", name));
      }
      self.inner.delete_cache(name)
    }

    fn get_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>> {
      if self.lookups_fail.load(Ordering::SeqCst) {
        return Err(eyre!("disk I/O error"));
      }
      self.inner.get_entry(name, key)
    }

    fn put_all(&self, name: &str, entries: &[CacheEntry]) -> Result<()> {
      if self.writes_fail.load(Ordering::SeqCst) {
        return Err(eyre!("database is full"));
      }
      self.inner.put_all(name, entries)
    }

    fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
      self.inner.entries(name)
    }
  }

  pub type TestAgent = OfflineCacheAgent<MemoryStorage, StubFetcher, LocalHost>;
  pub type FailingAgent = OfflineCacheAgent<FailingStorage, StubFetcher, LocalHost>;

  fn manifest_config() -> AgentConfig {
    AgentConfig::new(
      &Url::parse(ORIGIN).unwrap(),
      CACHE_NAME,
      &["/".to_string(), "/index.html".to_string(), "/manifest.json".to_string()],
      "offline",
    )
    .unwrap()
  }

  fn manifest_fetcher() -> StubFetcher {
    let fetcher = StubFetcher::default();
    fetcher.route(&url("/"), page("/", "<html>root</html>"));
    fetcher.route(&url("/index.html"), page("/index.html", "<html>index</html>"));
    fetcher.route(&url("/manifest.json"), page("/manifest.json", "{}"));
    fetcher
  }

  /// Agent with the default manifest, all manifest routes served.
  pub fn agent() -> TestAgent {
    OfflineCacheAgent::new(
      manifest_config(),
      MemoryStorage::new(),
      manifest_fetcher(),
      LocalHost::new(),
    )
  }

  /// Same as [`agent`], over storage that can be told to fail.
  pub fn failing_agent() -> FailingAgent {
    OfflineCacheAgent::new(
      manifest_config(),
      FailingStorage::default(),
      manifest_fetcher(),
      LocalHost::new(),
    )
  }
}
