//! Request and response snapshots exchanged between the agent, the cache and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// How a request treats cross-origin targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Cross-origin targets are a network error
  SameOrigin,
  /// Cross-origin targets are readable
  #[default]
  Cors,
  /// Cross-origin targets come back opaque
  NoCors,
  /// Top-level navigation
  Navigate,
}

impl std::str::FromStr for RequestMode {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "same-origin" => Ok(Self::SameOrigin),
      "cors" => Ok(Self::Cors),
      "no-cors" => Ok(Self::NoCors),
      "navigate" => Ok(Self::Navigate),
      other => Err(format!("unknown request mode: {}", other)),
    }
  }
}

/// Classification of a response by how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response, fully readable
  Basic,
  /// Cross-origin response readable under CORS
  Cors,
  /// Synthesized locally
  Default,
  /// Network error
  Error,
  /// Cross-origin no-cors response; status and body hidden
  Opaque,
  /// Redirect captured under manual redirect mode
  OpaqueRedirect,
}

impl std::fmt::Display for ResponseType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Default => "default",
      Self::Error => "error",
      Self::Opaque => "opaque",
      Self::OpaqueRedirect => "opaqueredirect",
    };
    f.write_str(name)
  }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub mode: RequestMode,
  pub body: Option<Bytes>,
}

impl Request {
  /// A plain `GET` request in `cors` mode.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
      mode: RequestMode::default(),
      body: None,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  /// Add a header, parsing name and value.
  pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value '{}': {}", value, e))?;
    self.headers.append(name, value);
    Ok(self)
  }

  /// Header value as a string, if present and valid UTF-8.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }
}

/// A response snapshot. Cloning shares the body bytes, so a clone is byte-identical.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: HeaderMap,
  pub body: Bytes,
  pub response_type: ResponseType,
  /// Final URL after redirects; `None` for synthesized responses
  pub url: Option<Url>,
  pub redirected: bool,
}

impl Response {
  /// A synthesized response of type `default`.
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    let status_text = StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: HeaderMap::new(),
      body: body.into(),
      response_type: ResponseType::Default,
      url: None,
      redirected: false,
    }
  }

  /// The offline fallback: 503 Service Unavailable, plain text.
  pub fn offline(message: &str) -> Self {
    let mut response = Self::new(503, Bytes::copy_from_slice(message.as_bytes()));
    response.status_text = "Service Unavailable".to_string();
    response
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
  }

  /// Status in the 200-299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  /// Header names listed in `Vary`, lowercased.
  pub fn vary(&self) -> Vec<String> {
    self
      .headers
      .get_all(reqwest::header::VARY)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .flat_map(|v| v.split(','))
      .map(|name| name.trim().to_ascii_lowercase())
      .filter(|name| !name.is_empty())
      .collect()
  }
}

/// Convert headers to ordered name/value pairs for storage.
pub fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect()
}

/// Rebuild a header map from stored pairs.
pub fn pairs_to_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(value)
      .map_err(|e| eyre!("Invalid stored header value '{}': {}", value, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_response_shape() {
    let response = Response::offline("gone");
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.body, Bytes::from_static(b"gone"));
    assert!(!response.ok());
  }

  #[test]
  fn test_vary_splits_and_lowercases() {
    let mut response = Response::new(200, "x");
    response
      .headers
      .append("vary", HeaderValue::from_static("Accept-Encoding, Accept"));
    response
      .headers
      .append("vary", HeaderValue::from_static("User-Agent"));
    assert_eq!(
      response.vary(),
      vec!["accept-encoding", "accept", "user-agent"]
    );
  }

  #[test]
  fn test_request_mode_parse() {
    assert_eq!("no-cors".parse::<RequestMode>().unwrap(), RequestMode::NoCors);
    assert_eq!(
      "SAME-ORIGIN".parse::<RequestMode>().unwrap(),
      RequestMode::SameOrigin
    );
    assert!("sideways".parse::<RequestMode>().is_err());
  }

  #[test]
  fn test_header_pairs_survive_storage() {
    let mut headers = HeaderMap::new();
    headers.append("content-type", HeaderValue::from_static("text/html"));
    headers.append("set-cookie", HeaderValue::from_static("a=1"));
    headers.append("set-cookie", HeaderValue::from_static("b=2"));

    let pairs = headers_to_pairs(&headers);
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs_to_headers(&pairs).unwrap(), headers);
  }
}
