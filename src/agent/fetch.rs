//! Fetch: cache first, then network, then the offline fallback.

use reqwest::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::OfflineCacheAgent;
use crate::cache::{CacheEntry, CacheStorage, QueryKey};
use crate::host::WorkerHost;
use crate::http::{Request, Response, ResponseType};
use crate::net::Fetcher;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Matched in a cache, no network call made
  Cache,
  /// Returned by the network
  Network,
  /// Network failed, offline fallback served
  Fallback,
}

/// Result of intercepting one request.
#[derive(Debug)]
pub struct FetchResult {
  pub response: Response,
  pub source: ResponseSource,
  /// Background cache write started for this response, if any.
  ///
  /// The write runs to completion whether or not this handle is awaited or dropped.
  pub cache_write: Option<JoinHandle<()>>,
}

impl FetchResult {
  fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cache_write: None,
    }
  }

  fn from_network(response: Response, cache_write: Option<JoinHandle<()>>) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cache_write,
    }
  }

  fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      cache_write: None,
    }
  }
}

/// Only plain same-origin `GET` 200s are worth keeping.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
  request.method == Method::GET
    && response.status == 200
    && response.response_type == ResponseType::Basic
    && !response.redirected
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  /// Handle a fetch event.
  pub async fn fetch(&self, request: Request) -> FetchResult {
    match self.storage.match_request(&request) {
      Ok(Some(hit)) => {
        debug!(request = %request.description(), cache = %hit.cache, "found in cache");
        return FetchResult::from_cache(hit.entry.response);
      }
      Ok(None) => {}
      Err(e) => warn!(request = %request.description(), error = %e, "cache lookup failed"),
    }

    debug!(request = %request.description(), "loading from network");
    let response = match self.fetcher.fetch(&request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(request = %request.description(), error = %e, "fetch failed, serving offline response");
        return FetchResult::fallback(Response::offline(&self.config.offline_message));
      }
    };

    if !is_cacheable(&request, &response) {
      trace!(
        request = %request.description(),
        status = response.status,
        response_type = %response.response_type,
        "not caching response"
      );
      return FetchResult::from_network(response, None);
    }

    let entry = CacheEntry::new(&request, response.clone());
    let cache_write = self.store_in_background(entry);
    FetchResult::from_network(response, Some(cache_write))
  }

  /// Write an entry to the current cache on a blocking task. Failures only reach the log.
  fn store_in_background(&self, entry: CacheEntry) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let cache_name = self.config.cache_name.clone();

    tokio::task::spawn_blocking(move || {
      let result = storage
        .open(&cache_name)
        .and_then(|()| storage.put(&cache_name, &entry));

      match result {
        Ok(()) => trace!(url = %entry.url, cache = %cache_name, "cached response"),
        Err(e) => debug!(url = %entry.url, cache = %cache_name, error = %e, "cache write failed"),
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use super::*;
  use crate::http::RequestMode;

  async fn settle(result: FetchResult) -> Response {
    if let Some(write) = result.cache_write {
      write.await.unwrap();
    }
    result.response
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let agent = agent();
    agent.install().await;
    let calls = agent.fetcher().calls();

    let result = agent.fetch(Request::get(url("/index.html"))).await;
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response, page("/index.html", "<html>index</html>"));
    assert!(result.cache_write.is_none());
    assert_eq!(agent.fetcher().calls(), calls);
  }

  #[tokio::test]
  async fn test_miss_goes_to_network_then_hits_cache() {
    let agent = agent();
    agent.fetcher().route(&url("/app.js"), page("/app.js", "console.log(1)"));

    let result = agent.fetch(Request::get(url("/app.js"))).await;
    assert_eq!(result.source, ResponseSource::Network);
    assert!(result.cache_write.is_some());
    let response = settle(result).await;
    assert_eq!(response.body.as_ref(), b"console.log(1)");
    assert_eq!(agent.fetcher().calls(), 1);

    agent.fetcher().set_offline(true);
    let again = agent.fetch(Request::get(url("/app.js"))).await;
    assert_eq!(again.source, ResponseSource::Cache);
    assert_eq!(again.response, response);
    assert_eq!(agent.fetcher().calls(), 1);
  }

  #[tokio::test]
  async fn test_network_copy_goes_into_current_cache() {
    let agent = agent();
    agent.fetcher().route(&url("/style.css"), page("/style.css", "body{}"));

    settle(agent.fetch(Request::get(url("/style.css"))).await).await;
    let entries = agent.storage().entries(CACHE_NAME).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, url("/style.css"));
  }

  #[tokio::test]
  async fn test_offline_miss_serves_fallback() {
    let agent = agent();
    agent.fetcher().set_offline(true);

    let result = agent.fetch(Request::get(url("/index.html"))).await;
    assert_eq!(result.source, ResponseSource::Fallback);
    assert_eq!(result.response, Response::offline("offline"));
    assert_eq!(result.response.status, 503);
    assert_eq!(result.response.header("content-type"), Some("text/plain"));
  }

  #[tokio::test]
  async fn test_error_status_is_returned_not_cached() {
    let agent = agent();
    let mut not_found = Response::new(404, "nope");
    not_found.response_type = ResponseType::Basic;
    agent.fetcher().route(&url("/missing"), not_found.clone());

    let result = agent.fetch(Request::get(url("/missing"))).await;
    assert_eq!(result.source, ResponseSource::Network);
    assert!(result.cache_write.is_none());
    assert_eq!(result.response, not_found);
    assert!(!agent.storage().has(CACHE_NAME).unwrap());
  }

  #[tokio::test]
  async fn test_opaque_response_is_returned_not_cached() {
    let agent = agent();
    let cdn = url::Url::parse("https://cdn.example.com/font.woff2").unwrap();
    let mut opaque = Response::new(200, "");
    opaque.status = 0;
    opaque.response_type = ResponseType::Opaque;
    agent.fetcher().route(&cdn, opaque.clone());

    let request = Request::get(cdn).with_mode(RequestMode::NoCors);
    let result = agent.fetch(request.clone()).await;
    assert_eq!(result.response, opaque);
    assert!(result.cache_write.is_none());

    agent.fetcher().set_offline(true);
    assert_eq!(agent.fetch(request).await.source, ResponseSource::Fallback);
  }

  #[tokio::test]
  async fn test_redirected_response_is_not_cached() {
    let agent = agent();
    let mut redirected = page("/new", "moved here");
    redirected.redirected = true;
    agent.fetcher().route(&url("/old"), redirected);

    let result = agent.fetch(Request::get(url("/old"))).await;
    assert!(result.cache_write.is_none());
  }

  #[tokio::test]
  async fn test_post_is_never_served_from_or_written_to_cache() {
    let agent = agent();
    agent.install().await;
    let calls = agent.fetcher().calls();

    let post = Request::get(url("/")).with_method(Method::POST);
    let result = agent.fetch(post).await;
    assert_eq!(result.source, ResponseSource::Network);
    assert!(result.cache_write.is_none());
    assert_eq!(agent.fetcher().calls(), calls + 1);
  }

  #[tokio::test]
  async fn test_stale_cache_still_answers_before_activation() {
    let agent = agent();
    agent.storage().open("time-calculator-v0.9").unwrap();
    agent
      .storage()
      .put(
        "time-calculator-v0.9",
        &CacheEntry::new(&Request::get(url("/")), page("/", "old root")),
      )
      .unwrap();

    let result = agent.fetch(Request::get(url("/"))).await;
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"old root");
  }

  #[tokio::test]
  async fn test_lookup_error_falls_through_to_network() {
    let agent = failing_agent();
    agent.install().await;
    agent.storage().fail_lookups();
    let calls = agent.fetcher().calls();

    let result = agent.fetch(Request::get(url("/index.html"))).await;
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(result.response.status, 200);
    assert_eq!(agent.fetcher().calls(), calls + 1);
  }

  #[tokio::test]
  async fn test_failed_background_write_stays_out_of_the_response() {
    let agent = failing_agent();
    agent.fetcher().route(&url("/app.js"), page("/app.js", "console.log(1)"));
    agent.storage().fail_writes();

    let result = agent.fetch(Request::get(url("/app.js"))).await;
    assert_eq!(result.source, ResponseSource::Network);
    let response = settle(result).await;
    assert_eq!(response, page("/app.js", "console.log(1)"));
    assert!(agent.storage().entries(CACHE_NAME).unwrap().is_empty());
  }
}
