use thiserror::Error;

/// Failure to obtain a response at all.
///
/// HTTP error statuses are not fetch errors: a 404 or 500 still resolves to a
/// [`Response`](super::Response). Only transport-level failures land here.
#[derive(Error, Debug)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("Offline: {url} is unreachable")]
  Offline { url: String },

  #[error("Failed to fetch {url}: no network and no cached response")]
  NoMatch { url: String },
}

impl FetchError {
  /// Build an offline error for a URL.
  pub fn offline(url: impl Into<String>) -> Self {
    FetchError::Offline { url: url.into() }
  }
}
