//! Request/response model and the network side of the controller.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// Build a GET request for an absolute URL.
  pub fn get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| Error::InvalidRequest(format!("{}: {}", url, e)))?;
    Ok(Self::from_url(url))
  }

  pub fn from_url(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  /// Only GET requests are ever written to or read from a cache.
  pub fn is_cacheable(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized identity of a request inside a namespace: method + URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  /// SHA256 digest used as a stable, fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A whole response snapshot. Cloning shares the body buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Anything below 400 counts as cacheable success.
  pub fn is_success(&self) -> bool {
    self.status < 400
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Caller-side interpretation of the status; strategies never call this.
  pub fn error_for_status(self) -> Result<Self> {
    if self.is_success() {
      Ok(self)
    } else {
      Err(Error::Upstream {
        status: self.status,
      })
    }
  }
}

/// The network path a strategy falls through to.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(user_agent: &str, timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| Error::InvalidRequest(format!("{}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| Error::transport(format!("{}: {}", request.url, e)))?;

    let status = response.status().as_u16();
    let url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // Whole-body snapshot; a body cut off mid-stream is a transport failure.
    let body = response
      .bytes()
      .await
      .map_err(|e| Error::transport(format!("{}: {}", request.url, e)))?;

    Ok(Response {
      url,
      status,
      headers,
      body,
    })
  }
}
