//! Bottom navigation state.
//!
//! Tracks which nav item is active, badges and notification dots, and keeps
//! the active item in session storage so it survives page loads.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::debug;

use crate::cache::SessionStore;
use crate::config::NavItemConfig;

/// Session key for the active nav item (its action, or its href).
pub const ACTIVE_NAV_KEY: &str = "activeNavItem";

/// Session key prefix for badge counts, one key per action.
const BADGE_KEY_PREFIX: &str = "navBadge:";

/// Session key prefix for notification dots, one key per action.
const NOTIFICATION_KEY_PREFIX: &str = "navNotification:";

/// Badge counts above this render as "99+".
const MAX_BADGE: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavItem {
  pub label: String,
  pub href: Option<String>,
  pub action: Option<String>,
  pub active: bool,
  pub badge: Option<String>,
  pub notification: bool,
}

impl From<&NavItemConfig> for NavItem {
  fn from(config: &NavItemConfig) -> Self {
    Self {
      label: config.label.clone(),
      href: config.href.clone(),
      action: config.action.clone(),
      active: false,
      badge: None,
      notification: false,
    }
  }
}

impl NavItem {
  /// Value persisted when this item becomes active.
  fn session_value(&self) -> Option<&str> {
    self.action.as_deref().or(self.href.as_deref())
  }

  /// Whether the item's href corresponds to the current path.
  ///
  /// The href minus one leading slash must occur in the path, so the root
  /// link `/` matches every page.
  fn matches_path(&self, current_path: &str) -> bool {
    let Some(href) = self.href.as_deref() else {
      return false;
    };
    if href == "#" {
      return false;
    }
    let fragment = href.strip_prefix('/').unwrap_or(href);
    current_path.contains(fragment)
  }
}

fn badge_text(count: u32) -> Option<String> {
  match count {
    0 => None,
    n if n > MAX_BADGE => Some(format!("{}+", MAX_BADGE)),
    n => Some(n.to_string()),
  }
}

/// Where a click leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
  /// Load this path
  To(String),
  /// Nothing to load
  Stay,
}

pub struct BottomNavigation<S: SessionStore> {
  items: Vec<NavItem>,
  session: Arc<S>,
}

impl<S: SessionStore> BottomNavigation<S> {
  pub fn new(items: &[NavItemConfig], session: Arc<S>) -> Self {
    Self {
      items: items.iter().map(NavItem::from).collect(),
      session,
    }
  }

  /// Build the navigation, restore badges and notification dots from the
  /// session, and mark the item for the current page active.
  pub fn init(items: &[NavItemConfig], session: Arc<S>, current_path: &str) -> Result<Self> {
    let mut nav = Self::new(items, session);
    nav.restore_indicators()?;
    nav.set_active_by_path(current_path)?;
    Ok(nav)
  }

  fn restore_indicators(&mut self) -> Result<()> {
    for item in &mut self.items {
      let Some(action) = item.action.as_deref() else {
        continue;
      };

      let count = self
        .session
        .get_item(&format!("{}{}", BADGE_KEY_PREFIX, action))?
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(0);
      item.badge = badge_text(count);
      item.notification = self
        .session
        .get_item(&format!("{}{}", NOTIFICATION_KEY_PREFIX, action))?
        .is_some();
    }
    Ok(())
  }

  pub fn items(&self) -> &[NavItem] {
    &self.items
  }

  pub fn active(&self) -> Option<&NavItem> {
    self.items.iter().find(|item| item.active)
  }

  /// Index of the item whose action, href or label equals `key`.
  pub fn find(&self, key: &str) -> Option<usize> {
    self.items.iter().position(|item| {
      item.action.as_deref() == Some(key)
        || item.href.as_deref() == Some(key)
        || item.label.eq_ignore_ascii_case(key)
    })
  }

  fn find_action(&mut self, action: &str) -> Option<&mut NavItem> {
    self
      .items
      .iter_mut()
      .find(|item| item.action.as_deref() == Some(action))
  }

  /// Make one item active and persist it for the session.
  pub fn set_active(&mut self, index: usize) -> Result<()> {
    if index >= self.items.len() {
      return Err(eyre!("No nav item at index {}", index));
    }

    for item in &mut self.items {
      item.active = false;
    }
    let item = &mut self.items[index];
    item.active = true;

    if let Some(value) = item.session_value() {
      self.session.set_item(ACTIVE_NAV_KEY, value)?;
    }
    Ok(())
  }

  /// Re-derive the active item from the current path and the stored value.
  ///
  /// Items are checked in order and every match is activated, so the last
  /// matching item wins. A path match takes precedence over the stored value
  /// for the same item.
  pub fn set_active_by_path(&mut self, current_path: &str) -> Result<()> {
    let stored = self.session.get_item(ACTIVE_NAV_KEY)?;

    for index in 0..self.items.len() {
      let item = &self.items[index];
      let by_path = item.matches_path(current_path);
      let by_action = item.action.is_some() && item.action == stored;

      if by_path || by_action {
        debug!(label = %item.label, by_path, "activating nav item");
        self.set_active(index)?;
      }
    }
    Ok(())
  }

  /// Handle a click on an item.
  pub fn handle_click(&mut self, index: usize) -> Result<Navigation> {
    let item = self
      .items
      .get(index)
      .ok_or_else(|| eyre!("No nav item at index {}", index))?;
    let Some(href) = item.href.clone() else {
      return Ok(Navigation::Stay);
    };
    let action = item.action.clone();

    self.set_active(index)?;

    if let Some(action) = action {
      return Ok(match Self::handle_action(&action) {
        Some(path) => Navigation::To(path.to_string()),
        None => Navigation::Stay,
      });
    }
    if href != "#" {
      return Ok(Navigation::To(href));
    }
    Ok(Navigation::Stay)
  }

  /// Page path for a nav action.
  pub fn handle_action(action: &str) -> Option<&'static str> {
    match action {
      "my-bets" => Some("/"),
      "explore" => Some("/explore"),
      "watched" => Some("/watched"),
      "social" => Some("/social"),
      "account" => Some("/account"),
      _ => None,
    }
  }

  /// Show a count on an item; zero removes the badge. Unknown actions are
  /// ignored.
  pub fn set_badge(&mut self, action: &str, count: u32) -> Result<()> {
    let Some(item) = self.find_action(action) else {
      debug!(action, "no nav item for badge");
      return Ok(());
    };
    item.badge = badge_text(count);

    let key = format!("{}{}", BADGE_KEY_PREFIX, action);
    match count {
      0 => self.session.remove_item(&key),
      n => self.session.set_item(&key, &n.to_string()),
    }
  }

  /// Show or hide the notification dot on an item.
  pub fn set_notification(&mut self, action: &str, show: bool) -> Result<()> {
    let Some(item) = self.find_action(action) else {
      debug!(action, "no nav item for notification");
      return Ok(());
    };
    item.notification = show;

    let key = format!("{}{}", NOTIFICATION_KEY_PREFIX, action);
    if show {
      self.session.set_item(&key, "1")
    } else {
      self.session.remove_item(&key)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::config::NavConfig;

  fn session() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::open_in_memory().unwrap())
  }

  fn items() -> Vec<NavItemConfig> {
    NavConfig::default().items
  }

  #[test]
  fn test_set_active_persists_action() {
    let session = session();
    let mut nav = BottomNavigation::new(&items(), Arc::clone(&session));

    nav.set_active(1).unwrap();

    assert_eq!(nav.active().unwrap().label, "Explore");
    assert_eq!(nav.items().iter().filter(|i| i.active).count(), 1);
    assert_eq!(
      session.get_item(ACTIVE_NAV_KEY).unwrap().as_deref(),
      Some("explore")
    );
    assert!(nav.set_active(42).is_err());
  }

  #[test]
  fn test_set_active_falls_back_to_href() {
    let session = session();
    let items = vec![NavItemConfig {
      label: "Help".into(),
      href: Some("/help".into()),
      action: None,
    }];
    let mut nav = BottomNavigation::new(&items, Arc::clone(&session));

    nav.set_active(0).unwrap();

    assert_eq!(
      session.get_item(ACTIVE_NAV_KEY).unwrap().as_deref(),
      Some("/help")
    );
  }

  #[test]
  fn test_active_by_path() {
    let session = session();
    let nav = BottomNavigation::init(&items(), Arc::clone(&session), "/watched").unwrap();

    // The root link matches too, but the later match wins
    assert_eq!(nav.active().unwrap().label, "Watched");
    assert_eq!(nav.items().iter().filter(|i| i.active).count(), 1);
    assert_eq!(
      session.get_item(ACTIVE_NAV_KEY).unwrap().as_deref(),
      Some("watched")
    );

    let nav = BottomNavigation::init(&items(), self::session(), "/").unwrap();
    assert_eq!(nav.active().unwrap().label, "My Bets");
  }

  #[test]
  fn test_active_restored_from_session() {
    let session = session();
    session.set_item(ACTIVE_NAV_KEY, "social").unwrap();

    let nav = BottomNavigation::init(&items(), session, "/bets/204").unwrap();

    assert_eq!(nav.active().unwrap().label, "Social");
  }

  #[test]
  fn test_root_link_matches_any_page() {
    let session = session();

    let nav = BottomNavigation::init(&items(), Arc::clone(&session), "/bets/204").unwrap();

    assert_eq!(nav.active().unwrap().label, "My Bets");
    assert_eq!(
      session.get_item(ACTIVE_NAV_KEY).unwrap().as_deref(),
      Some("my-bets")
    );
  }

  #[test]
  fn test_no_match_leaves_nothing_active() {
    let items = vec![
      NavItemConfig {
        label: "Help".into(),
        href: Some("/help".into()),
        action: None,
      },
      NavItemConfig {
        label: "Menu".into(),
        href: Some("#".into()),
        action: None,
      },
    ];

    let nav = BottomNavigation::init(&items, session(), "/bets/204").unwrap();

    assert!(nav.active().is_none());
  }

  #[test]
  fn test_click_navigates_by_action() {
    let session = session();
    let mut nav = BottomNavigation::new(&items(), Arc::clone(&session));

    let target = nav.handle_click(nav.find("account").unwrap()).unwrap();

    assert_eq!(target, Navigation::To("/account".into()));
    assert_eq!(nav.active().unwrap().label, "Account");

    // Survives a "page load"
    let reloaded = BottomNavigation::init(&items(), session, "/bets/204").unwrap();
    assert_eq!(reloaded.active().unwrap().label, "Account");
  }

  #[test]
  fn test_click_without_action_uses_href() {
    let items = vec![
      NavItemConfig {
        label: "Help".into(),
        href: Some("/help".into()),
        action: None,
      },
      NavItemConfig {
        label: "Menu".into(),
        href: Some("#".into()),
        action: None,
      },
      NavItemConfig {
        label: "Broken".into(),
        href: None,
        action: Some("explore".into()),
      },
    ];
    let mut nav = BottomNavigation::new(&items, session());

    assert_eq!(nav.handle_click(0).unwrap(), Navigation::To("/help".into()));
    assert_eq!(nav.handle_click(1).unwrap(), Navigation::Stay);
    assert_eq!(nav.handle_click(2).unwrap(), Navigation::Stay);
    // A click on an item without href does not change the active item
    assert_eq!(nav.active().unwrap().label, "Menu");
  }

  #[test]
  fn test_unknown_action_stays() {
    assert_eq!(
      BottomNavigation::<SqliteStorage>::handle_action("my-bets"),
      Some("/")
    );
    assert_eq!(BottomNavigation::<SqliteStorage>::handle_action("settings"), None);
  }

  #[test]
  fn test_badges() {
    let mut nav = BottomNavigation::new(&items(), session());

    nav.set_badge("my-bets", 3).unwrap();
    assert_eq!(nav.items()[0].badge.as_deref(), Some("3"));

    nav.set_badge("my-bets", 150).unwrap();
    assert_eq!(nav.items()[0].badge.as_deref(), Some("99+"));

    nav.set_badge("my-bets", 0).unwrap();
    assert_eq!(nav.items()[0].badge, None);

    nav.set_badge("missing", 5).unwrap();
    assert!(nav.items().iter().all(|i| i.badge.is_none()));
  }

  #[test]
  fn test_notifications() {
    let mut nav = BottomNavigation::new(&items(), session());

    nav.set_notification("social", true).unwrap();
    assert!(nav.items()[3].notification);

    nav.set_notification("social", false).unwrap();
    assert!(!nav.items()[3].notification);
  }

  #[test]
  fn test_indicators_survive_page_load() {
    let session = session();
    let mut nav = BottomNavigation::new(&items(), Arc::clone(&session));
    nav.set_badge("watched", 120).unwrap();
    nav.set_badge("explore", 4).unwrap();
    nav.set_badge("explore", 0).unwrap();
    nav.set_notification("social", true).unwrap();

    let reloaded = BottomNavigation::init(&items(), session, "/").unwrap();

    assert_eq!(reloaded.items()[2].badge.as_deref(), Some("99+"));
    assert_eq!(reloaded.items()[1].badge, None);
    assert!(reloaded.items()[3].notification);
    assert!(!reloaded.items()[4].notification);
  }
}
