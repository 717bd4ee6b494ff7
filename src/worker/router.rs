//! Request classification.

use reqwest::Method;

use crate::config::RoutesConfig;
use crate::net::Request;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted; the host performs the request natively
  PassThrough,
  /// API-class: live data first, cache only when the network fails
  NetworkFirst,
  /// Static-class: cache first, refreshed in the background
  CacheFirst,
}

/// Classifies requests against the configured route table.
#[derive(Debug, Clone)]
pub struct Router {
  routes: RoutesConfig,
}

impl Router {
  pub fn new(routes: RoutesConfig) -> Self {
    Self { routes }
  }

  /// Pick a strategy for a request. Pure; performs no I/O.
  pub fn classify(&self, request: &Request) -> Strategy {
    if request.method != Method::GET {
      return Strategy::PassThrough;
    }

    let scheme = request.url.scheme();
    if self.routes.skip_schemes.iter().any(|s| s == scheme) {
      return Strategy::PassThrough;
    }

    if self.is_api(request) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }

  fn is_api(&self, request: &Request) -> bool {
    let path = request.url.path();
    self
      .routes
      .api_prefixes
      .iter()
      .any(|prefix| path.contains(prefix.as_str()))
  }
}
