use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::agent::{ActivateReport, FetchResult, InstallOutcome, OfflineCacheAgent};
use crate::cache::CacheStorage;
use crate::host::{Notification, WorkerHost};
use crate::http::Request;
use crate::net::Fetcher;

/// Events delivered to the agent
#[derive(Debug)]
pub enum WorkerEvent {
  /// New generation installed; reply once the cache is populated (or failed to be)
  Install { done: oneshot::Sender<InstallOutcome> },
  /// Generation taking over; reply once stale caches are gone
  Activate { done: oneshot::Sender<ActivateReport> },
  /// Outgoing request to answer
  Fetch {
    request: Request,
    respond_with: oneshot::Sender<FetchResult>,
  },
  /// Structured message from a client
  Message { data: Value, done: oneshot::Sender<bool> },
  /// Push delivery
  Push {
    data: Option<Bytes>,
    done: oneshot::Sender<Option<Notification>>,
  },
}

impl WorkerEvent {
  fn name(&self) -> &'static str {
    match self {
      Self::Install { .. } => "install",
      Self::Activate { .. } => "activate",
      Self::Fetch { .. } => "fetch",
      Self::Message { .. } => "message",
      Self::Push { .. } => "push",
    }
  }
}

/// Event handler that feeds events to the agent, one task per event
pub struct EventHandler;

impl EventHandler {
  /// Start the dispatch loop. It runs until every handle is dropped.
  pub fn spawn<S, F, H>(agent: OfflineCacheAgent<S, F, H>) -> WorkerHandle
  where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: WorkerHost + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "dispatching");
        let agent = agent.clone();

        // Events interleave; each runs in its own task. A dropped reply receiver is not an error.
        tokio::spawn(async move {
          match event {
            WorkerEvent::Install { done } => {
              let _ = done.send(agent.install().await);
            }
            WorkerEvent::Activate { done } => {
              let _ = done.send(agent.activate().await);
            }
            WorkerEvent::Fetch {
              request,
              respond_with,
            } => {
              let _ = respond_with.send(agent.fetch(request).await);
            }
            WorkerEvent::Message { data, done } => {
              let _ = done.send(agent.message(&data).await);
            }
            WorkerEvent::Push { data, done } => {
              let _ = done.send(agent.push(data).await);
            }
          }
        });
      }
      debug!("event loop finished");
    });

    WorkerHandle { tx }
  }
}

/// Sends events to a running agent and waits for them to settle
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  /// Send an event that is answered through a oneshot channel.
  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent) -> Result<T> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(make(done))
      .map_err(|_| eyre!("Event loop is not running"))?;
    rx.await.map_err(|_| eyre!("Event handler dropped without replying"))
  }

  pub async fn install(&self) -> Result<InstallOutcome> {
    self.request(|done| WorkerEvent::Install { done }).await
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    self.request(|done| WorkerEvent::Activate { done }).await
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchResult> {
    self
      .request(|respond_with| WorkerEvent::Fetch {
        request,
        respond_with,
      })
      .await
  }

  /// Post a message; returns whether the agent recognized it.
  pub async fn post_message(&self, data: Value) -> Result<bool> {
    self.request(|done| WorkerEvent::Message { data, done }).await
  }

  pub async fn push(&self, data: Option<Bytes>) -> Result<Option<Notification>> {
    self.request(|done| WorkerEvent::Push { data, done }).await
  }
}
