//! Users and groups: the registries every other record points into.
//!
//! Both are upserted lazily on first contact. After creation a user changes
//! only through counter increments and one-time token assignment; a group
//! changes only through its settings and its active-giveaway slot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GroupId, UserId};

/// Fallback shown when a user has neither a first name nor a handle.
pub const ANONYMOUS: &str = "Anonymous";

/// Resolve a display name: first name, then `@handle`, then [`ANONYMOUS`].
pub fn display_name(first_name: Option<&str>, username: Option<&str>) -> String {
  let non_empty = |s: &&str| !s.trim().is_empty();
  if let Some(first) = first_name.filter(non_empty) {
    return first.to_owned();
  }
  if let Some(handle) = username.filter(non_empty) {
    return format!("@{}", handle.trim_start_matches('@'));
  }
  ANONYMOUS.to_owned()
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:         UserId,
  pub first_name:      Option<String>,
  pub username:        Option<String>,
  pub registered_at:   DateTime<Utc>,
  /// Cached count of valid ledger events where this user is the referrer.
  pub total_referrals: u64,
  /// Set at most once; shared links stay stable for the user's lifetime.
  pub personal_token:  Option<String>,
  /// Per-group invite tokens, each set at most once.
  pub group_tokens:    BTreeMap<GroupId, String>,
}

impl User {
  pub fn display_name(&self) -> String {
    display_name(self.first_name.as_deref(), self.username.as_deref())
  }
}

/// Input for [`ReferralStore::upsert_user`](crate::store::ReferralStore::upsert_user).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
  pub user_id:    UserId,
  pub first_name: Option<String>,
  pub username:   Option<String>,
}

impl NewUser {
  /// A user known only by id, e.g. a referrer seen before they ever spoke.
  pub fn bare(user_id: UserId) -> Self {
    Self { user_id, ..Default::default() }
  }
}

// ─── Groups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
  /// Greeting template rendered by the platform adapter for new members.
  pub welcome_template: Option<String>,
  /// Default number of rows returned by the group leaderboard.
  pub leaderboard_size: u32,
}

impl Default for GroupSettings {
  fn default() -> Self {
    Self { welcome_template: None, leaderboard_size: 10 }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub group_id:           GroupId,
  pub title:              String,
  pub settings:           GroupSettings,
  pub registered_at:      DateTime<Utc>,
  /// Non-null while a giveaway is running in this group.
  pub active_giveaway_id: Option<Uuid>,
}

/// Input for [`ReferralStore::upsert_group`](crate::store::ReferralStore::upsert_group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
  pub group_id: GroupId,
  pub title:    String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_name_prefers_first_name() {
    assert_eq!(display_name(Some("Alice"), Some("alice_w")), "Alice");
  }

  #[test]
  fn display_name_falls_back_to_handle() {
    assert_eq!(display_name(None, Some("alice_w")), "@alice_w");
    assert_eq!(display_name(Some("  "), Some("@alice_w")), "@alice_w");
  }

  #[test]
  fn display_name_falls_back_to_anonymous() {
    assert_eq!(display_name(None, None), ANONYMOUS);
    assert_eq!(display_name(Some(""), Some("")), ANONYMOUS);
  }

  #[test]
  fn group_settings_default_from_partial_json() {
    let settings: GroupSettings =
      serde_json::from_str(r#"{"welcome_template":"hi {name}"}"#).unwrap();
    assert_eq!(settings.leaderboard_size, 10);
    assert_eq!(settings.welcome_template.as_deref(), Some("hi {name}"));
  }
}
