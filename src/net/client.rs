use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::config::NetworkConfig;

use super::error::FetchError;
use super::types::{Request, Response};

/// The network as seen from the worker.
///
/// Implementations resolve to a buffered [`Response`] for any HTTP status and
/// fail only when no response could be obtained.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request)
    -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await?;
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
    let body = response.bytes().await?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "network response");

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

/// Network that is never reachable. Used for `--offline`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    Err(FetchError::offline(request.url.as_str()))
  }
}
