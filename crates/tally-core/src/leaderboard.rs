//! Leaderboard query and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GroupId, UserId};

/// Time window over ledger timestamps; both ends inclusive.
/// A missing `until` means "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
  pub since: DateTime<Utc>,
  pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
  /// Every valid referral, direct and group-mediated, all time.
  Global,
  /// Referrals into one group. Without a window, an active giveaway's
  /// `[started_at, now]` is used, otherwise all time.
  Group {
    group_id: GroupId,
    window:   Option<Window>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
  pub rank:         u32,
  pub user_id:      UserId,
  pub display_name: String,
  pub count:        u32,
}
