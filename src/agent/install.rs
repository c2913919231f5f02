//! Install: pre-cache the asset manifest.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::{debug, error, info};

use super::OfflineCacheAgent;
use crate::cache::{CacheEntry, CacheStorage, QueryKey};
use crate::host::WorkerHost;
use crate::http::{Request, ResponseType};
use crate::net::Fetcher;

/// How an install went. Install never fails outright; a failed population leaves the cache
/// created but without the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  /// Every asset was fetched and stored
  Populated { assets: usize },
  /// Population failed and nothing was stored
  Failed { reason: String },
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  /// Handle the install event.
  pub async fn install(&self) -> InstallOutcome {
    info!(cache = %self.config.cache_name, "installing");

    match self.populate().await {
      Ok(assets) => {
        info!(cache = %self.config.cache_name, assets, "cache populated");
        InstallOutcome::Populated { assets }
      }
      Err(e) => {
        error!(cache = %self.config.cache_name, error = %e, "failed to populate cache");
        InstallOutcome::Failed {
          reason: e.to_string(),
        }
      }
    }
  }

  async fn populate(&self) -> Result<usize> {
    self.storage.open(&self.config.cache_name)?;
    debug!(cache = %self.config.cache_name, "cache opened");

    let requests: Vec<Request> = self.config.assets.iter().cloned().map(Request::get).collect();
    self.add_all(&requests).await
  }

  /// Fetch every request and store all responses, or store nothing.
  async fn add_all(&self, requests: &[Request]) -> Result<usize> {
    let mut seen = HashSet::new();
    for request in requests {
      if !seen.insert(request.cache_hash()) {
        return Err(eyre!("Duplicate request in asset list: {}", request.url));
      }
    }

    let responses = try_join_all(requests.iter().map(|request| self.fetcher.fetch(request))).await?;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, response) in requests.iter().zip(responses) {
      if response.response_type == ResponseType::Error || !response.ok() || response.status == 206 {
        return Err(eyre!(
          "Unusable response for {}: {} {}",
          request.url,
          response.status,
          response.status_text
        ));
      }
      if response.vary().iter().any(|name| name == "*") {
        return Err(eyre!("Response for {} varies on *", request.url));
      }
      entries.push(CacheEntry::new(request, response));
    }

    self.storage.put_all(&self.config.cache_name, &entries)?;
    Ok(entries.len())
  }
}
