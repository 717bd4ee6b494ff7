//! Service worker: lifecycle handling and request interception.

mod host;
mod lifecycle;
mod router;

pub use host::Host;
pub use lifecycle::{ActivationReport, InstallError, InstallReport, Phase, Registration};
pub use router::{Router, Strategy};

use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, SessionStore, SqliteStorage};
use crate::config::{CacheGenerations, Config};
use crate::event::{ClientMessage, Event, EventOutcome, WaitUntil};
use crate::net::{FetchError, HttpNetwork, Network, Request, RequestKey, Response};

/// One version of the service worker.
///
/// Owns the caching strategies for its generation pair and handles the four
/// events the host dispatches: install, activate, fetch and message.
pub struct ServiceWorker<S = SqliteStorage, N = HttpNetwork>
where
  S: CacheStorage + SessionStore,
  N: Network,
{
  cache: CacheLayer<S>,
  network: Arc<N>,
  router: Router,
  static_assets: Vec<Url>,
  skip_waiting_on_install: bool,
  phase: Mutex<Phase>,
  skip_waiting: AtomicBool,
}

impl<S, N> ServiceWorker<S, N>
where
  S: CacheStorage + SessionStore,
  N: Network,
{
  /// Build the worker for the configured version.
  ///
  /// The starting phase is taken from the persisted registration, so a
  /// previously activated version starts out activated.
  pub fn new(config: &Config, storage: Arc<S>, network: Arc<N>) -> Result<Self> {
    let generations = config.generations();
    let registration = Registration::load(&*storage)?;
    let phase = if registration.active.as_deref() == Some(generations.version.as_str()) {
      Phase::Activated
    } else if registration.waiting.as_deref() == Some(generations.version.as_str()) {
      Phase::Installed
    } else {
      Phase::Parsed
    };

    let cache = CacheLayer::new(storage, generations, config.origin.origin());

    Ok(Self {
      cache,
      network,
      router: Router::new(config.routes.clone()),
      static_assets: config.static_asset_urls()?,
      skip_waiting_on_install: config.worker.skip_waiting_on_install,
      phase: Mutex::new(phase),
      skip_waiting: AtomicBool::new(false),
    })
  }

  pub fn version(&self) -> &str {
    &self.cache.generations().version
  }

  pub fn generations(&self) -> &CacheGenerations {
    self.cache.generations()
  }

  pub fn storage(&self) -> &Arc<S> {
    self.cache.storage()
  }

  /// Session storage shared with the pages in scope.
  pub fn session(&self) -> &S {
    self.cache.storage()
  }

  pub fn phase(&self) -> Phase {
    self.phase.lock().map(|p| *p).unwrap_or(Phase::Redundant)
  }

  fn set_phase(&self, phase: Phase) {
    if let Ok(mut current) = self.phase.lock() {
      debug!(version = %self.version(), from = ?*current, to = ?phase, "phase change");
      *current = phase;
    }
  }

  /// Ask the host to activate this version without waiting for pages to close.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Hand an event to the worker. The returned token settles when the work
  /// triggered by the event has finished.
  pub fn dispatch(self: &Arc<Self>, event: Event) -> WaitUntil<EventOutcome> {
    let worker = Arc::clone(self);
    WaitUntil::new(tokio::spawn(async move { worker.handle(event).await }))
  }

  async fn handle(&self, event: Event) -> Result<EventOutcome> {
    match event {
      Event::Install => self.install().await.map(EventOutcome::Installed),
      Event::Activate => self.activate().await.map(EventOutcome::Activated),
      Event::Fetch(request) => self.fetch(request).await,
      Event::Message(message) => Ok(EventOutcome::MessageHandled {
        skip_waiting: self.message(message),
      }),
    }
  }

  /// Prime the static cache with every static asset.
  ///
  /// All assets are fetched before anything is written. If any of them fails
  /// the worker becomes redundant and the static cache is left untouched.
  pub async fn install(&self) -> Result<InstallReport> {
    info!(version = %self.version(), "installing");
    self.set_phase(Phase::Installing);

    let entries = match self.fetch_static_assets().await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(version = %self.version(), error = %e, "install failed");
        self.set_phase(Phase::Redundant);
        return Err(e);
      }
    };

    let static_name = self.generations().static_name.clone();
    info!(cache = %static_name, assets = entries.len(), "caching static assets");
    if let Err(e) = self.storage().put_all(&static_name, &entries) {
      self.set_phase(Phase::Redundant);
      return Err(e);
    }

    let mut registration = Registration::load(self.session())?;
    registration.waiting = Some(self.version().to_string());
    registration.save(self.session())?;

    if self.skip_waiting_on_install {
      self.skip_waiting();
    }
    self.set_phase(Phase::Installed);

    Ok(InstallReport {
      cache_name: static_name,
      assets: entries.len(),
      skip_waiting: self.skip_waiting_requested(),
    })
  }

  async fn fetch_static_assets(&self) -> Result<Vec<(RequestKey, Response)>> {
    let fetches = self.static_assets.iter().map(|url| {
      let request = Request::get(url.clone());
      let network = Arc::clone(&self.network);
      async move {
        let response = match network.fetch(&request).await {
          Ok(response) => response,
          Err(e) => {
            return Err(InstallError::AssetUnreachable {
              url: request.url.to_string(),
              reason: e.to_string(),
            });
          }
        };
        if !response.ok() {
          return Err(InstallError::AssetStatus {
            url: request.url.to_string(),
            status: response.status,
          });
        }
        Ok((request.cache_key(), response))
      }
    });

    futures::future::try_join_all(fetches)
      .await
      .map_err(Report::new)
  }

  /// Delete every stale generation, then claim open pages.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let mut registration = Registration::load(self.session())?;
    let version = self.version().to_string();
    let installed = registration.waiting.as_deref() == Some(version.as_str())
      || registration.active.as_deref() == Some(version.as_str());
    if !installed {
      return Err(eyre!("Worker {} has not been installed", version));
    }

    info!(version = %version, "activating");
    self.set_phase(Phase::Activating);

    let mut removed = Vec::new();
    for name in self.storage().keys()? {
      if !self.generations().is_current(&name) {
        info!(cache = %name, "removing old cache");
        if self.storage().delete(&name)? {
          removed.push(name);
        }
      }
    }

    registration.active = Some(version.clone());
    if registration.waiting.as_deref() == Some(version.as_str()) {
      registration.waiting = None;
    }
    // Claim open pages so they route through this version without a reload
    registration.controlling = true;
    registration.save(self.session())?;

    self.set_phase(Phase::Activated);

    Ok(ActivationReport { version, removed })
  }

  /// Handle a posted message. Returns true when activation was requested.
  pub fn message(&self, message: ClientMessage) -> bool {
    match message {
      ClientMessage::SkipWaiting => {
        debug!(version = %self.version(), "skip waiting requested by page");
        self.skip_waiting();
        true
      }
      ClientMessage::Unknown => {
        debug!("ignoring unrecognized message");
        false
      }
    }
  }

  /// Route an intercepted request through its caching strategy.
  pub async fn fetch(&self, request: Request) -> Result<EventOutcome> {
    let strategy = self.router.classify(&request);
    debug!(method = %request.method, url = %request.url, ?strategy, "intercepted");

    let result = match strategy {
      Strategy::PassThrough => return Ok(EventOutcome::PassThrough(request)),
      Strategy::NetworkFirst => {
        self
          .cache
          .network_first(&request, || self.network_fetch(&request))
          .await?
      }
      Strategy::CacheFirst => {
        self
          .cache
          .cache_first(&request, || self.network_fetch(&request))
          .await?
      }
    };

    Ok(EventOutcome::Responded(result))
  }

  /// An owned network fetch that can outlive this call.
  fn network_fetch(
    &self,
    request: &Request,
  ) -> impl Future<Output = Result<Response, FetchError>> + Send + 'static {
    let network = Arc::clone(&self.network);
    let request = request.clone();
    async move { network.fetch(&request).await }
  }

  /// Wait for detached background refreshes to finish writing.
  pub async fn settle_background(&self) {
    self.cache.settle_background().await;
  }
}
