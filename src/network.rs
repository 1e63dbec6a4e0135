//! Network boundary.
//!
//! The engine is a transparent intermediary: requests go out exactly as the
//! host produced them, and responses are buffered to completion before anyone
//! looks at them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::NetworkError;
use crate::http::{Request, ResponseSnapshot};

/// Something that can perform a request and return a fully buffered response.
///
/// A returned `Ok` means the server answered, whatever the status. `Err` is
/// reserved for transport failures.
pub trait Network: Send + Sync {
  fn fetch(
    &self,
    url: Url,
    request: Request,
  ) -> impl Future<Output = Result<ResponseSnapshot, NetworkError>> + Send;
}

impl<N: Network> Network for Arc<N> {
  fn fetch(
    &self,
    url: Url,
    request: Request,
  ) -> impl Future<Output = Result<ResponseSnapshot, NetworkError>> + Send {
    (**self).fetch(url, request)
  }
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  timeout: Option<Duration>,
}

impl HttpNetwork {
  pub fn new() -> Result<Self, NetworkError> {
    Self::build(None)
  }

  /// Client that gives up on a request after `timeout`.
  pub fn with_timeout(timeout: Duration) -> Result<Self, NetworkError> {
    Self::build(Some(timeout))
  }

  fn build(timeout: Option<Duration>) -> Result<Self, NetworkError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| NetworkError::Other(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self { client, timeout })
  }

  fn map_error(&self, err: reqwest::Error) -> NetworkError {
    match self.timeout {
      Some(timeout) if err.is_timeout() => NetworkError::Timeout {
        millis: timeout.as_millis() as u64,
      },
      _ if err.is_connect() => NetworkError::Connect(err.to_string()),
      _ => NetworkError::Other(err.to_string()),
    }
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, url: Url, request: Request) -> Result<ResponseSnapshot, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| NetworkError::Other(e.to_string()))?;

    let mut builder = self.client.request(method, url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(|e| self.map_error(e))?;

    let status = response.status().as_u16();
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
    let body = response
      .bytes()
      .await
      .map_err(|e| self.map_error(e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
    })
  }
}
