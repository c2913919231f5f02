//! Cache keys and entries.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};

/// Something that can be used to look up a cache entry.
pub trait QueryKey {
  /// Stable, fixed-length key for storage.
  fn cache_hash(&self) -> String;

  /// Human readable form for logs.
  fn description(&self) -> String;
}

impl QueryKey for Url {
  fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(self).as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    normalize_url(self)
  }
}

impl QueryKey for Request {
  fn cache_hash(&self) -> String {
    self.url.cache_hash()
  }

  fn description(&self) -> String {
    format!("{} {}", self.method, normalize_url(&self.url))
  }
}

/// Fragments never reach the server, so they are not part of the identity.
fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Storage key derived from the request URL
  pub key: String,
  /// Request URL without fragment
  pub url: Url,
  /// Request header values for each header named by the response's `Vary`
  pub vary: Vec<(String, Option<String>)>,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a request/response pair for storage.
  pub fn new(request: &Request, response: Response) -> Self {
    let vary = response
      .vary()
      .into_iter()
      .map(|name| {
        let value = request.header(&name).map(String::from);
        (name, value)
      })
      .collect();

    let mut url = request.url.clone();
    url.set_fragment(None);

    Self {
      key: request.cache_hash(),
      url,
      vary,
      response,
      cached_at: Utc::now(),
    }
  }

  /// Whether this entry answers the given request.
  ///
  /// Only `GET` requests match. Every header recorded from `Vary` must carry the same value, and
  /// `Vary: *` never matches.
  pub fn matches(&self, request: &Request) -> bool {
    if request.method != Method::GET || request.cache_hash() != self.key {
      return false;
    }

    self.vary.iter().all(|(name, stored)| {
      name != "*" && request.header(name).map(String::from) == *stored
    })
  }
}
