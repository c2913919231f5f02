//! Activate: drop every cache generation but the current one.

use tracing::{error, info, warn};

use super::OfflineCacheAgent;
use crate::cache::CacheStorage;
use crate::host::WorkerHost;
use crate::net::Fetcher;

/// Caches removed (or not) during activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  /// Handle the activate event.
  pub async fn activate(&self) -> ActivateReport {
    info!(cache = %self.config.cache_name, "activating");
    let mut report = ActivateReport::default();

    let names = match self.storage.cache_names() {
      Ok(names) => names,
      Err(e) => {
        error!(error = %e, "failed to list caches");
        return report;
      }
    };

    for name in names.into_iter().filter(|n| *n != self.config.cache_name) {
      info!(cache = %name, "deleting old cache");
      match self.storage.delete_cache(&name) {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!(cache = %name, error = %e, "failed to delete old cache");
          report.failed.push(name);
        }
      }
    }

    report
  }
}
