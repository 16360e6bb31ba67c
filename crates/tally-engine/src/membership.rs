//! [`MembershipHistory`]: idempotent first-seen records per group.
//!
//! Recording a join is independent of referral processing and must happen
//! before any pending-referral lookup for the same join; otherwise a second
//! evaluation could see no record and treat a re-join as fresh.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound as _, Utc};
use tally_core::{membership::MembershipRecord, store::ReferralStore, GroupId, UserId};

use crate::{Error, Result};

pub struct MembershipHistory<S> {
  store: Arc<S>,
}

impl<S> Clone for MembershipHistory<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ReferralStore> MembershipHistory<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Insert-if-absent; returns the earliest record for `(user, group)`.
  pub async fn record_first_join(
    &self,
    user_id: UserId,
    group_id: GroupId,
    joined_at: DateTime<Utc>,
  ) -> Result<MembershipRecord> {
    let joined_at = joined_at.trunc_subsecs(6);
    let record = MembershipRecord { user_id, group_id, first_joined_at: joined_at };
    let stored = self.store.record_first_join(record).await.map_err(Error::store)?;
    if stored.first_joined_at != joined_at {
      tracing::debug!(user_id, group_id, first_joined_at = %stored.first_joined_at, "re-join observed");
    }
    Ok(stored)
  }

  pub async fn first_join(&self, user_id: UserId, group_id: GroupId) -> Result<Option<MembershipRecord>> {
    self.store.get_membership(user_id, group_id).await.map_err(Error::store)
  }
}
