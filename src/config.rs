use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker is registered on; only same-origin responses are cached
  #[serde(deserialize_with = "deserialize_origin")]
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Paths primed into the static cache at install, resolved against `origin`
  #[serde(default = "default_static_assets")]
  pub static_assets: Vec<String>,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub log: LogConfig,
  #[serde(default)]
  pub nav: NavConfig,
}

fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  let url = Url::parse(&s).map_err(serde::de::Error::custom)?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(serde::de::Error::custom(format!(
      "origin must be an http(s) URL, got {}",
      s
    )));
  }
  Ok(url)
}

fn default_static_assets() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/manifest.json",
    "/media/logos/nfl-logo-1.svg",
    "/media/logos/nfl-logo-2.svg",
    "/media/trophy-1.svg",
    "/media/trophy-2.svg",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Generation suffix shared by the static and dynamic caches. Bump it
  /// whenever the static asset list changes.
  #[serde(default = "default_version")]
  pub version: String,
  /// Database location (default: $XDG_DATA_HOME/swcache/cache.db)
  pub path: Option<PathBuf>,
}

fn default_version() -> String {
  "v2".to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_version(),
      path: None,
    }
  }
}

/// Names of the live cache generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGenerations {
  pub version: String,
  pub static_name: String,
  pub dynamic_name: String,
}

impl CacheGenerations {
  pub fn for_version(version: &str) -> Self {
    Self {
      version: version.to_string(),
      static_name: format!("static-{}", version),
      dynamic_name: format!("dynamic-{}", version),
    }
  }

  /// True if `name` is one of the live generations.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path fragments that mark a request as API-class (network-first)
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// URL schemes never intercepted (browser extensions)
  #[serde(default = "default_skip_schemes", deserialize_with = "deserialize_schemes")]
  pub skip_schemes: Vec<String>,
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".into(), "/admin/".into(), "/auth/".into()]
}

fn default_skip_schemes() -> Vec<String> {
  vec![
    "chrome-extension".into(),
    "moz-extension".into(),
    "safari-web-extension".into(),
  ]
}

/// Accept "chrome-extension:" as well as "chrome-extension".
fn deserialize_schemes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_end_matches(':').to_lowercase())
      .collect(),
  )
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefixes: default_api_prefixes(),
      skip_schemes: default_skip_schemes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  /// Activate right after install instead of waiting for open pages to close
  #[serde(default = "default_true")]
  pub skip_waiting_on_install: bool,
}

fn default_true() -> bool {
  true
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      skip_waiting_on_install: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  concat!("swcache/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Also write logs to this file
  pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavConfig {
  #[serde(default = "default_nav_items")]
  pub items: Vec<NavItemConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NavItemConfig {
  pub label: String,
  pub href: Option<String>,
  pub action: Option<String>,
}

fn default_nav_items() -> Vec<NavItemConfig> {
  [
    ("My Bets", "/", "my-bets"),
    ("Explore", "/explore", "explore"),
    ("Watched", "/watched", "watched"),
    ("Social", "/social", "social"),
    ("Account", "/account", "account"),
  ]
  .into_iter()
  .map(|(label, href, action)| NavItemConfig {
    label: label.to_string(),
    href: Some(href.to_string()),
    action: Some(action.to_string()),
  })
  .collect()
}

impl Default for NavConfig {
  fn default() -> Self {
    Self {
      items: default_nav_items(),
    }
  }
}

impl Config {
  /// Configuration with every default, for the given origin.
  #[allow(dead_code)]
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      static_assets: default_static_assets(),
      routes: RoutesConfig::default(),
      worker: WorkerConfig::default(),
      network: NetworkConfig::default(),
      log: LogConfig::default(),
      nav: NavConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/swcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The live cache generation names.
  pub fn generations(&self) -> CacheGenerations {
    CacheGenerations::for_version(&self.cache.version)
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))
  }

  /// Static asset list as absolute URLs.
  pub fn static_asset_urls(&self) -> Result<Vec<Url>> {
    self.static_assets.iter().map(|p| self.resolve(p)).collect()
  }
}
