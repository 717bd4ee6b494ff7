//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::Report, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Origin;

use super::storage::SqliteStorage;
use super::traits::{CacheResult, CacheStorage};
use crate::config::CacheGenerations;
use crate::net::{FetchError, Request, Response};

/// Cache layer that applies a caching strategy around a network fetch.
///
/// This layer sits between the worker and the network, deciding which source
/// answers a request and which generation receives the copy.
pub struct CacheLayer<S: CacheStorage = SqliteStorage> {
  storage: Arc<S>,
  generations: CacheGenerations,
  /// Origin of the worker scope; only same-origin responses are stored
  origin: Origin,
  /// Detached refresh tasks still running
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given registry.
  pub fn new(storage: Arc<S>, generations: CacheGenerations, origin: Origin) -> Self {
    Self {
      storage,
      generations,
      origin,
      background: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn generations(&self) -> &CacheGenerations {
    &self.generations
  }

  /// Whether a network response may be written to a cache.
  ///
  /// Requires status 200, an http(s) request URL, and a request on the
  /// worker's own origin.
  pub fn is_cacheable(&self, request: &Request, response: &Response) -> bool {
    cacheable(&self.origin, request, response)
  }

  /// Best-effort write. The response is already decided, so failures are
  /// logged and dropped.
  fn store(&self, cache_name: &str, request: &Request, response: &Response) {
    store_best_effort(&*self.storage, cache_name, request, response);
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Fetch from network
  /// 2. On success, store a copy in the dynamic cache and return the response
  /// 3. On network failure, return any cached entry (offline mode)
  /// 4. With nothing cached, fail
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    match fetcher().await {
      Ok(response) => {
        if self.is_cacheable(request, &response) {
          let copy = response.clone();
          self.store(&self.generations.dynamic_name, request, &copy);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed, trying cache");

        match self.storage.match_any(&request.cache_key()) {
          Ok(Some(cached)) => Ok(CacheResult::offline(cached.response, cached.stored_at)),
          Ok(None) => Err(Report::new(FetchError::NoMatch {
            url: request.url.to_string(),
          })),
          Err(lookup) => {
            warn!(url = %request.url, error = %lookup, "cache lookup failed");
            Err(Report::new(err))
          }
        }
      }
    }
  }

  /// Fetch with cache-first strategy and background refresh.
  ///
  /// 1. Check every cache - on a hit, return it immediately
  /// 2. On a hit, refresh the entry from the network in a detached task that
  ///    writes into the static cache
  /// 3. On a miss, fetch from network and store a copy in the dynamic cache
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>> + Send + 'static,
  {
    let cached = match self.storage.match_any(&request.cache_key()) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed, treating as miss");
        None
      }
    };

    if let Some(cached) = cached {
      self.spawn_refresh(request.clone(), fetcher());
      return Ok(CacheResult::from_cache(cached.response, cached.stored_at));
    }

    let response = fetcher().await?;
    if self.is_cacheable(request, &response) {
      let copy = response.clone();
      self.store(&self.generations.dynamic_name, request, &copy);
    }

    Ok(CacheResult::from_network(response))
  }

  /// Spawn a detached refresh of a cache hit.
  ///
  /// The caller has already been answered from cache, so the outcome of this
  /// task is discarded: network errors and write errors are logged at debug
  /// level and go nowhere else.
  fn spawn_refresh<Fut>(&self, request: Request, fetch: Fut)
  where
    Fut: Future<Output = Result<Response, FetchError>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let static_name = self.generations.static_name.clone();
    let origin = self.origin.clone();

    let handle = tokio::spawn(async move {
      match fetch.await {
        Ok(response) => {
          if cacheable(&origin, &request, &response) {
            store_best_effort(&*storage, &static_name, &request, &response);
            debug!(url = %request.url, cache = %static_name, "background refresh stored");
          }
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "background refresh failed, discarded");
        }
      }
    });

    match self.background.lock() {
      Ok(mut tasks) => {
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
      }
      Err(e) => warn!(error = %e, "background task list poisoned, refresh left untracked"),
    }
  }

  /// Wait for every background refresh spawned so far.
  pub async fn settle_background(&self) {
    let tasks: Vec<JoinHandle<()>> = match self.background.lock() {
      Ok(mut tasks) => tasks.drain(..).collect(),
      Err(_) => return,
    };

    for result in futures::future::join_all(tasks).await {
      if let Err(e) = result {
        debug!(error = %e, "background refresh task aborted");
      }
    }
  }
}

fn cacheable(origin: &Origin, request: &Request, response: &Response) -> bool {
  response.status == 200 && request.is_http() && request.url.origin() == *origin
}

fn store_best_effort<S: CacheStorage + ?Sized>(
  storage: &S,
  cache_name: &str,
  request: &Request,
  response: &Response,
) {
  if let Err(e) = storage.put(cache_name, &request.cache_key(), response) {
    warn!(url = %request.url, cache = cache_name, error = %e, "cache write failed");
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generations: self.generations.clone(),
      origin: self.origin.clone(),
      background: Arc::clone(&self.background),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CachedResponse;
  use crate::cache::CacheSource;
  use crate::net::RequestKey;
  use color_eyre::eyre::eyre;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use url::Url;

  const ORIGIN: &str = "https://app.example.com";

  fn layer() -> CacheLayer<SqliteStorage> {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let origin = Url::parse(ORIGIN).unwrap().origin();
    CacheLayer::new(storage, CacheGenerations::for_version("v2"), origin)
  }

  fn request(path: &str) -> Request {
    Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
  }

  fn online(body: &'static str) -> impl FnOnce() -> futures::future::Ready<Result<Response, FetchError>> {
    move || futures::future::ready(Ok(Response::new(200, body)))
  }

  fn offline(url: &str) -> impl FnOnce() -> futures::future::Ready<Result<Response, FetchError>> {
    let url = url.to_string();
    move || futures::future::ready(Err(FetchError::offline(url)))
  }

  #[tokio::test]
  async fn test_network_first_stores_copy_in_dynamic() {
    let layer = layer();
    let req = request("/api/bets");

    let result = layer.network_first(&req, online("[1,2]")).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"[1,2]".to_vec());
    let stored = layer
      .storage()
      .match_in("dynamic-v2", &req.cache_key())
      .unwrap()
      .expect("dynamic copy");
    assert_eq!(stored.response, result.data);
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_when_offline() {
    let layer = layer();
    let req = request("/api/bets");

    layer.network_first(&req, online("live")).await.unwrap();
    let result = layer
      .network_first(&req, offline(req.url.as_str()))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.body, b"live".to_vec());
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_network_first_fails_without_cache() {
    let layer = layer();
    let req = request("/api/bets");

    let err = layer
      .network_first(&req, offline(req.url.as_str()))
      .await
      .unwrap_err();

    assert!(matches!(
      err.downcast_ref::<FetchError>(),
      Some(FetchError::NoMatch { .. })
    ));
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_stored() {
    let layer = layer();
    let req = request("/api/bets");

    let result = layer
      .network_first(&req, || futures::future::ready(Ok(Response::new(500, "boom"))))
      .await
      .unwrap();

    assert_eq!(result.data.status, 500);
    assert!(layer.storage().match_any(&req.cache_key()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cross_origin_is_not_stored() {
    let layer = layer();
    let req = Request::get(Url::parse("https://cdn.example.net/api/lib.js").unwrap());

    layer.network_first(&req, online("x")).await.unwrap();
    layer.cache_first(&req, online("x")).await.unwrap();

    assert!(layer.storage().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_in_dynamic() {
    let layer = layer();
    let req = request("/styles.css");

    let result = layer.cache_first(&req, online("body{}")).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert!(layer
      .storage()
      .match_in("dynamic-v2", &req.cache_key())
      .unwrap()
      .is_some());
    assert!(layer
      .storage()
      .match_in("static-v2", &req.cache_key())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_fails() {
    let layer = layer();
    let req = request("/styles.css");

    let err = layer
      .cache_first(&req, offline(req.url.as_str()))
      .await
      .unwrap_err();

    assert!(matches!(
      err.downcast_ref::<FetchError>(),
      Some(FetchError::Offline { .. })
    ));
  }

  #[tokio::test]
  async fn test_cache_first_hit_refreshes_static_in_background() {
    let layer = layer();
    let req = request("/logo.svg");
    layer
      .storage()
      .put("static-v2", &req.cache_key(), &Response::new(200, "<svg>old</svg>"))
      .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result = layer
      .cache_first(&req, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(200, "<svg>new</svg>"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"<svg>old</svg>".to_vec());

    layer.settle_background().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let refreshed = layer
      .storage()
      .match_in("static-v2", &req.cache_key())
      .unwrap()
      .unwrap();
    assert_eq!(refreshed.response.body, b"<svg>new</svg>".to_vec());
    // The response already handed out is untouched
    assert_eq!(result.data.body, b"<svg>old</svg>".to_vec());
  }

  #[tokio::test]
  async fn test_cache_first_hit_in_dynamic_refreshes_into_static() {
    let layer = layer();
    let req = request("/app.js");
    layer.cache_first(&req, online("v1")).await.unwrap();

    let result = layer.cache_first(&req, online("v2")).await.unwrap();
    layer.settle_background().await;

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"v1".to_vec());
    let static_copy = layer
      .storage()
      .match_in("static-v2", &req.cache_key())
      .unwrap()
      .expect("refresh lands in static");
    assert_eq!(static_copy.response.body, b"v2".to_vec());
  }

  #[tokio::test]
  async fn test_cache_first_background_failure_is_swallowed() {
    let layer = layer();
    let req = request("/logo.svg");
    layer
      .storage()
      .put("static-v2", &req.cache_key(), &Response::new(200, "cached"))
      .unwrap();

    let result = layer
      .cache_first(&req, offline(req.url.as_str()))
      .await
      .unwrap();
    layer.settle_background().await;

    assert_eq!(result.data.body, b"cached".to_vec());
    let still = layer
      .storage()
      .match_in("static-v2", &req.cache_key())
      .unwrap()
      .unwrap();
    assert_eq!(still.response.body, b"cached".to_vec());
  }

  /// Registry whose writes always fail, and whose lookups either fail or
  /// return a fixed entry.
  struct BrokenStorage {
    hit: Option<CachedResponse>,
    puts: AtomicUsize,
  }

  impl BrokenStorage {
    fn new(hit: Option<&str>) -> Self {
      Self {
        hit: hit.map(|body| CachedResponse {
          response: Response::new(200, body),
          cache_name: "static-v2".to_string(),
          stored_at: chrono::Utc::now(),
        }),
        puts: AtomicUsize::new(0),
      }
    }
  }

  impl CacheStorage for BrokenStorage {
    fn open_cache(&self, _cache_name: &str) -> Result<()> {
      Err(eyre!("disk full"))
    }

    fn keys(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }

    fn delete(&self, _cache_name: &str) -> Result<bool> {
      Ok(false)
    }

    fn put(&self, _cache_name: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
      self.puts.fetch_add(1, Ordering::SeqCst);
      Err(eyre!("disk full"))
    }

    fn put_all(&self, _cache_name: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
      Err(eyre!("disk full"))
    }

    fn match_in(&self, _cache_name: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
      Err(eyre!("database is locked"))
    }

    fn match_any(&self, _key: &RequestKey) -> Result<Option<CachedResponse>> {
      match &self.hit {
        Some(hit) => Ok(Some(hit.clone())),
        None => Err(eyre!("database is locked")),
      }
    }

    fn entry_keys(&self, _cache_name: &str) -> Result<Vec<RequestKey>> {
      Ok(Vec::new())
    }
  }

  fn broken_layer(hit: Option<&str>) -> CacheLayer<BrokenStorage> {
    let origin = Url::parse(ORIGIN).unwrap().origin();
    CacheLayer::new(
      Arc::new(BrokenStorage::new(hit)),
      CacheGenerations::for_version("v2"),
      origin,
    )
  }

  #[tokio::test]
  async fn test_failed_write_does_not_fail_network_first() {
    let layer = broken_layer(None);
    let req = request("/api/bets");

    let result = layer.network_first(&req, online("[1]")).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"[1]".to_vec());
    assert_eq!(layer.storage().puts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failed_lookup_offline_surfaces_network_error() {
    let layer = broken_layer(None);
    let req = request("/api/bets");

    let err = layer
      .network_first(&req, offline(req.url.as_str()))
      .await
      .unwrap_err();

    assert!(matches!(
      err.downcast_ref::<FetchError>(),
      Some(FetchError::Offline { .. })
    ));
  }

  #[tokio::test]
  async fn test_failed_lookup_is_a_cache_first_miss() {
    let layer = broken_layer(None);
    let req = request("/styles.css");

    let result = layer.cache_first(&req, online("body{}")).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"body{}".to_vec());
    assert_eq!(layer.storage().puts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_background_refresh_swallows_failed_write() {
    let layer = broken_layer(Some("cached"));
    let req = request("/logo.svg");

    let result = layer.cache_first(&req, online("fresh")).await.unwrap();
    layer.settle_background().await;

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"cached".to_vec());
    assert_eq!(layer.storage().puts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_requests_do_not_interfere() {
    let layer = layer();
    let paths = ["/api/a", "/api/b", "/api/c", "/api/d"];

    let handles: Vec<_> = paths
      .iter()
      .map(|path| {
        let layer = layer.clone();
        let req = request(path);
        let body = path.to_string();
        tokio::spawn(async move {
          layer
            .network_first(&req, move || async move { Ok(Response::new(200, body)) })
            .await
        })
      })
      .collect();

    for handle in futures::future::join_all(handles).await {
      handle.unwrap().unwrap();
    }

    let mut bodies: HashMap<String, Vec<u8>> = HashMap::new();
    for key in layer.storage().entry_keys("dynamic-v2").unwrap() {
      let stored = layer.storage().match_in("dynamic-v2", &key).unwrap().unwrap();
      bodies.insert(key.url, stored.response.body);
    }
    assert_eq!(bodies.len(), 4);
    assert_eq!(bodies[&format!("{}/api/c", ORIGIN)], b"/api/c".to_vec());
  }
}
