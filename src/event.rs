use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::cache::CacheResult;
use crate::net::{Request, Response};
use crate::worker::{ActivationReport, InstallReport};

/// Events the host dispatches into the worker
#[derive(Debug)]
pub enum Event {
  /// Prime the static cache for this version
  Install,
  /// Drop stale generations and claim open pages
  Activate,
  /// A page issued a network request
  Fetch(Request),
  /// A page posted a message
  Message(ClientMessage),
}

/// Messages a page can post to the worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Activate the waiting version now
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  /// Parse a posted JSON message. Anything unrecognized is `Unknown`.
  pub fn parse(raw: &str) -> Self {
    serde_json::from_str(raw).unwrap_or(ClientMessage::Unknown)
  }
}

/// What the worker did with an event
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivationReport),
  /// The worker answered the fetch
  Responded(CacheResult<Response>),
  /// The worker declined the fetch; the host must perform it natively
  PassThrough(Request),
  /// Message processed; `skip_waiting` is set when activation was requested
  MessageHandled { skip_waiting: bool },
}

/// Continuation token for a dispatched event.
///
/// The work runs as its own task; the host awaits the token before treating
/// the event as complete. Dropping the token does not cancel the work.
#[derive(Debug)]
pub struct WaitUntil<T> {
  handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> WaitUntil<T> {
  pub fn new(handle: JoinHandle<Result<T>>) -> Self {
    Self { handle }
  }

  /// Wait for the event's work to settle.
  pub async fn settled(self) -> Result<T> {
    self
      .handle
      .await
      .map_err(|e| eyre!("Event handler task failed: {}", e))?
  }
}
