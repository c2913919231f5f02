//! Network access for the agent.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use url::{Origin, Position, Url};

use crate::http::{Request, RequestMode, Response, ResponseType};

/// Performs network requests on behalf of the agent.
///
/// An `Err` means the network itself failed (unreachable host, refused connection, blocked
/// cross-origin request). HTTP error statuses are successful fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpFetcher {
  /// Create a fetcher that treats `origin` as its own origin.
  pub fn new(origin: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(client, origin))
  }

  /// Use a preconfigured client.
  pub fn with_client(client: reqwest::Client, origin: &Url) -> Self {
    Self {
      client,
      origin: origin.origin(),
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    if request.mode == RequestMode::SameOrigin && request.url.origin() != self.origin {
      return Err(eyre!(
        "Cross-origin request to {} blocked in same-origin mode",
        request.url
      ));
    }

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone());
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let final_url = response.url().clone();
    let response_type = classify(&self.origin, &final_url, request.mode);
    if request.mode == RequestMode::SameOrigin && response_type != ResponseType::Basic {
      return Err(eyre!(
        "Redirect from {} to {} blocked in same-origin mode",
        request.url,
        final_url
      ));
    }
    // The final URL never carries the request's fragment
    let redirected = final_url[..Position::AfterQuery] != request.url[..Position::AfterQuery];

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    if response_type == ResponseType::Opaque {
      return Ok(Response {
        status: 0,
        status_text: String::new(),
        headers: HeaderMap::new(),
        body: Default::default(),
        response_type,
        url: None,
        redirected: false,
      });
    }

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
      response_type,
      url: Some(final_url),
      redirected,
    })
  }
}

/// Response type for a fetch that ended at `final_url`.
pub fn classify(origin: &Origin, final_url: &Url, mode: RequestMode) -> ResponseType {
  if final_url.origin() == *origin {
    ResponseType::Basic
  } else if mode == RequestMode::NoCors {
    ResponseType::Opaque
  } else {
    ResponseType::Cors
  }
}
