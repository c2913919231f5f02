//! The registration the agent runs under.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;

/// A notification to show to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: BTreeMap<String, Value>,
}

/// Operations the agent asks of whatever hosts it.
#[async_trait]
pub trait WorkerHost: Send + Sync {
  /// Let a freshly installed agent generation take over without waiting for old clients.
  async fn skip_waiting(&self) -> Result<()>;

  async fn show_notification(&self, notification: &Notification) -> Result<()>;
}

/// Host for running the agent locally: records requests and logs them.
#[derive(Default)]
pub struct LocalHost {
  skip_waiting: AtomicBool,
  notifications: Mutex<Vec<Notification>>,
}

impl LocalHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether skip-waiting has been requested.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Notifications shown so far, oldest first.
  pub fn notifications(&self) -> Result<Vec<Notification>> {
    Ok(
      self
        .notifications
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone(),
    )
  }
}

#[async_trait]
impl WorkerHost for LocalHost {
  async fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.store(true, Ordering::SeqCst);
    info!("skip waiting requested, new generation activates immediately");
    Ok(())
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "showing notification");
    self
      .notifications
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(notification.clone());
    Ok(())
  }
}
