//! The hosting runtime: dispatches events and performs native fetches.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::lifecycle::{ActivationReport, InstallReport, Registration};
use super::ServiceWorker;
use crate::cache::{CacheResult, CacheStorage, SessionStore, SqliteStorage};
use crate::event::{ClientMessage, Event, EventOutcome};
use crate::net::{HttpNetwork, Network, Request, Response};

/// Plays the browser's part around a [`ServiceWorker`].
///
/// Pages fetch through the host. While the worker controls the scope,
/// requests are dispatched to it; otherwise, and for requests the worker
/// declines, the host goes to the network directly.
pub struct Host<S = SqliteStorage, N = HttpNetwork>
where
  S: CacheStorage + SessionStore,
  N: Network,
{
  worker: Arc<ServiceWorker<S, N>>,
  network: Arc<N>,
}

impl<S, N> Host<S, N>
where
  S: CacheStorage + SessionStore,
  N: Network,
{
  pub fn new(worker: Arc<ServiceWorker<S, N>>, network: Arc<N>) -> Self {
    Self { worker, network }
  }

  pub fn worker(&self) -> &Arc<ServiceWorker<S, N>> {
    &self.worker
  }

  pub fn registration(&self) -> Result<Registration> {
    Registration::load(self.worker.session())
  }

  /// Install the worker. It is activated right away when it asked to skip
  /// waiting or when no version is active yet.
  pub async fn install(&self) -> Result<(InstallReport, Option<ActivationReport>)> {
    let before = self.registration()?;

    let report = match self.worker.dispatch(Event::Install).settled().await? {
      EventOutcome::Installed(report) => report,
      other => return Err(eyre!("Unexpected install outcome: {:?}", other)),
    };

    let activation = if self.worker.skip_waiting_requested() || before.active.is_none() {
      Some(self.activate().await?)
    } else {
      info!(version = %self.worker.version(), "installed, waiting for activation");
      None
    };

    Ok((report, activation))
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    match self.worker.dispatch(Event::Activate).settled().await? {
      EventOutcome::Activated(report) => Ok(report),
      other => Err(eyre!("Unexpected activate outcome: {:?}", other)),
    }
  }

  /// Post a raw JSON message from a page. Activates the waiting version when
  /// the message asks to skip waiting.
  pub async fn post_message(&self, raw: &str) -> Result<Option<ActivationReport>> {
    let message = ClientMessage::parse(raw);

    let skip_waiting = match self.worker.dispatch(Event::Message(message)).settled().await? {
      EventOutcome::MessageHandled { skip_waiting } => skip_waiting,
      other => return Err(eyre!("Unexpected message outcome: {:?}", other)),
    };

    let waiting = self.registration()?.waiting;
    if skip_waiting && waiting.as_deref() == Some(self.worker.version()) {
      return Ok(Some(self.activate().await?));
    }

    Ok(None)
  }

  /// Fetch on behalf of a page.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    if !self.registration()?.controls(self.worker.version()) {
      debug!(url = %request.url, "page not controlled, fetching natively");
      return self.native_fetch(request).await;
    }

    match self.worker.dispatch(Event::Fetch(request)).settled().await? {
      EventOutcome::Responded(result) => Ok(result),
      EventOutcome::PassThrough(request) => self.native_fetch(request).await,
      other => Err(eyre!("Unexpected fetch outcome: {:?}", other)),
    }
  }

  async fn native_fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    let response = self.network.fetch(&request).await?;
    Ok(CacheResult::from_network(response))
  }

  /// Let detached background work finish before the host goes away.
  pub async fn shutdown(&self) {
    self.worker.settle_background().await;
  }
}
