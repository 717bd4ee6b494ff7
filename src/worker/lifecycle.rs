//! Worker lifecycle state and the persisted registration.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::SessionStore;

/// Session key holding the serialized [`Registration`].
const REGISTRATION_KEY: &str = "swcache.registration";

/// Lifecycle phase of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Parsed,
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activating,
  Activated,
  /// Install failed; this version will never activate
  Redundant,
}

/// Which worker versions exist for the scope and whether pages are controlled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
  /// Version currently serving requests
  pub active: Option<String>,
  /// Installed version waiting to take over
  pub waiting: Option<String>,
  /// Active version has claimed open pages
  pub controlling: bool,
}

impl Registration {
  pub fn load<S: SessionStore + ?Sized>(store: &S) -> Result<Self> {
    match store.get_item(REGISTRATION_KEY)? {
      Some(raw) => serde_json::from_str(&raw)
        .map_err(|e| eyre!("Failed to parse worker registration: {}", e)),
      None => Ok(Self::default()),
    }
  }

  pub fn save<S: SessionStore + ?Sized>(&self, store: &S) -> Result<()> {
    let raw = serde_json::to_string(self)
      .map_err(|e| eyre!("Failed to serialize worker registration: {}", e))?;
    store.set_item(REGISTRATION_KEY, &raw)
  }

  /// True if `version` is active and controls pages.
  pub fn controls(&self, version: &str) -> bool {
    self.controlling && self.active.as_deref() == Some(version)
  }
}

/// Installation failed because a static asset could not be primed.
#[derive(Error, Debug)]
pub enum InstallError {
  #[error("Static asset {url} is unreachable: {reason}")]
  AssetUnreachable { url: String, reason: String },

  #[error("Static asset {url} returned status {status}")]
  AssetStatus { url: String, status: u16 },
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache_name: String,
  pub assets: usize,
  /// The worker asked to skip the waiting phase
  pub skip_waiting: bool,
}

/// Outcome of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub version: String,
  /// Stale generations that were deleted
  pub removed: Vec<String>,
}
