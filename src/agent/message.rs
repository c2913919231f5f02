//! Message: the skip-waiting command.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use super::OfflineCacheAgent;
use crate::cache::CacheStorage;
use crate::host::WorkerHost;
use crate::net::Fetcher;

/// Messages the agent understands, tagged by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
  /// Take over immediately instead of waiting for old clients to close
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl<S, F, H> OfflineCacheAgent<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
  H: WorkerHost + 'static,
{
  /// Handle a message event. Returns whether the message was recognized.
  pub async fn message(&self, data: &Value) -> bool {
    match WorkerMessage::deserialize(data) {
      Ok(WorkerMessage::SkipWaiting) => {
        info!("skip waiting");
        if let Err(e) = self.host.skip_waiting().await {
          error!(error = %e, "skip waiting failed");
        }
        true
      }
      Err(_) => {
        debug!(%data, "ignoring message");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_skip_waiting_reaches_host() {
    let agent = agent();
    assert!(agent.message(&json!({ "type": "SKIP_WAITING" })).await);
    assert!(agent.host().skip_waiting_requested());
  }

  #[tokio::test]
  async fn test_other_messages_are_ignored() {
    let agent = agent();
    agent.install().await;
    let before = agent.storage().entries(CACHE_NAME).unwrap().len();

    for payload in [
      json!({ "type": "skip_waiting" }),
      json!({ "type": "CLEAR_CACHE" }),
      json!({ "kind": "SKIP_WAITING" }),
      json!("SKIP_WAITING"),
      json!(null),
      json!(42),
    ] {
      assert!(!agent.message(&payload).await, "{}", payload);
    }

    assert!(!agent.host().skip_waiting_requested());
    assert_eq!(agent.storage().entries(CACHE_NAME).unwrap().len(), before);
  }
}
