//! Push: show the fixed "ready" notification.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{error, trace};

use super::OfflineCacheAgent;
use crate::cache::CacheStorage;
use crate::host::{Notification, WorkerHost};
use crate::net::Fetcher;

const TITLE: &str = "Time Calculator";
const BODY: &str = "Time calculator is ready to go!";
const ICON: &str = "data:image/svg+xml;base64,PHN2ZyB4bWxucz0iaHR0cDovL3d3dy53My5vcmcvMjAwMC9zdmciIHZpZXdCb3g9IjAgMCA5NiA5NiIgZmlsbD0iIzY2N2VlYSI+PGNpcmNsZSBjeD0iNDgiIGN5PSI0OCIgcj0iNDQiIGZpbGw9IiM2NjdlZWEiLz48dGV4dCB4PSI0OCIgeT0iNTYiIGZpbGw9IiNmZmYiIGZvbnQtc2l6ZT0iMTYiIHRleHQtYW5jaG9yPSJtaWRkbGUiPlQ8L3RleHQ+PC9zdmc+";
const BADGE: &str = "data:image/svg+xml;base64,PHN2ZyB4bWxucz0iaHR0cDovL3d3dy53My5vcmcvMjAwMC9zdmciIHZpZXdCb3g9IjAgMCA0OCA0OCIgZmlsbD0iIzY2N2VlYSI+PGNpcmNsZSBjeD0iMjQiIGN5PSIyNCIgcj0iMjIiIGZpbGw9IiM2NjdlZWEiLz48L3N2Zz4=";
const VIBRATE: [u32; 3] = [100, 50, 100];

/// The notification shown for every push, stamped with its arrival time.
pub fn notification(arrived: DateTime<Utc>) -> Notification {
  let mut data = BTreeMap::new();
  data.insert("dateOfArrival".to_string(), json!(arrived.timestamp_millis()));
  data.insert("primaryKey".to_string(), json!("2"));

  Notification {
    title: TITLE.to_string(),
    body: BODY.to_string(),
    icon: ICON.to_string(),
    badge: BADGE.to_string(),
    vibrate: VIBRATE.to_vec(),
    data,
  }
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  /// Handle a push event. The payload does not influence the notification.
  ///
  /// Returns the notification if the host showed it.
  pub async fn push(&self, data: Option<Bytes>) -> Option<Notification> {
    trace!(payload_len = data.as_ref().map(|d| d.len()), "push received");

    let notification = notification(Utc::now());
    match self.host.show_notification(&notification).await {
      Ok(()) => Some(notification),
      Err(e) => {
        error!(error = %e, "failed to show notification");
        None
      }
    }
  }
}
