//! Request/response types and the network seam used by downloads and the
//! interceptor.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

#[cfg(test)]
pub(crate) mod testing;

/// Whether a request loads a whole page or something a page embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  SubResource,
}

#[derive(Debug, Clone)]
pub struct NetRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl NetRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::SubResource,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// Cache key: method plus absolute URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl NetResponse {
  pub fn ok(body: impl Into<Vec<u8>>) -> Self {
    Self {
      status: 200,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Anything that can turn a request into a response.
///
/// `Err` means no response arrived at all. HTTP error statuses come back as
/// `Ok` with the status set.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse>;
}

/// `reqwest`-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(NetResponse {
      status,
      headers,
      body,
    })
  }
}
