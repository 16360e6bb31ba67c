//! First-seen membership records: the anti-gaming signal for re-joins.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{GroupId, UserId};

/// The first time a user was seen joining a group.
/// Unique per `(user_id, group_id)`; written at most once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
  pub user_id:         UserId,
  pub group_id:        GroupId,
  pub first_joined_at: DateTime<Utc>,
}

impl MembershipRecord {
  /// `true` if the first join happened more than `guard` before `at`.
  ///
  /// A record younger than the guard was most likely written by the very
  /// join that triggered the attribution attempt being evaluated.
  pub fn predates(&self, at: DateTime<Utc>, guard: Duration) -> bool {
    at - self.first_joined_at > guard
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(first_joined_at: DateTime<Utc>) -> MembershipRecord {
    MembershipRecord { user_id: 1, group_id: -100, first_joined_at }
  }

  #[test]
  fn fresh_join_is_within_guard() {
    let now = Utc::now();
    let r = record(now - Duration::milliseconds(200));
    assert!(!r.predates(now, Duration::seconds(1)));
  }

  #[test]
  fn old_join_predates() {
    let now = Utc::now();
    let r = record(now - Duration::days(3));
    assert!(r.predates(now, Duration::seconds(1)));
  }

  #[test]
  fn zero_guard_trusts_any_earlier_join() {
    let now = Utc::now();
    let r = record(now - Duration::milliseconds(1));
    assert!(r.predates(now, Duration::zero()));
    assert!(!record(now).predates(now, Duration::zero()));
  }
}
