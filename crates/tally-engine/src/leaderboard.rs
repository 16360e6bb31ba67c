//! [`LeaderboardAggregator`]: read-only ranking over the ledger.

use std::sync::Arc;

use tally_core::{
  identity::ANONYMOUS,
  leaderboard::{LeaderboardEntry, Scope},
  referral::ReferralFilter,
  store::ReferralStore,
};

use crate::{Error, Result};

pub struct LeaderboardAggregator<S> {
  store:         Arc<S>,
  default_limit: usize,
}

impl<S> Clone for LeaderboardAggregator<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), default_limit: self.default_limit }
  }
}

impl<S: ReferralStore> LeaderboardAggregator<S> {
  /// `default_limit` applies to the global board and to groups that have
  /// no stored size.
  pub fn new(store: Arc<S>, default_limit: usize) -> Self {
    Self { store, default_limit }
  }

  /// Rank referrers by valid referral count within `scope`.
  ///
  /// For a group without an explicit window, a running giveaway's
  /// `[started_at, now]` is used, otherwise all time. A missing `limit`
  /// falls back to the group's `leaderboard_size`. An unregistered group
  /// ranks with the default size and no giveaway.
  pub async fn rank(&self, scope: Scope, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>> {
    let filter = match scope {
      Scope::Global => ReferralFilter::valid().limit(limit.unwrap_or(self.default_limit)),
      Scope::Group { group_id, window } => {
        let group = self
          .store
          .get_group(group_id)
          .await
          .map_err(Error::store)?;
        let limit = limit.unwrap_or_else(|| {
          group.as_ref().map_or(self.default_limit, |g| g.settings.leaderboard_size as usize)
        });
        let mut filter = ReferralFilter::valid().in_group(group_id).limit(limit);

        let now = tally_core::now();
        if let Some(window) = window {
          filter = filter.between(window.since, window.until.unwrap_or(now));
        } else if let Some(active_id) = group.and_then(|g| g.active_giveaway_id) {
          let giveaway = self.store.get_giveaway(active_id).await.map_err(Error::store)?;
          if let Some(giveaway) = giveaway.filter(|g| g.active) {
            filter = filter.between(giveaway.started_at, now);
          }
        }
        filter
      }
    };

    if filter.limit == Some(0) {
      return Ok(Vec::new());
    }

    let standings = self.store.count_by_referrer(&filter).await.map_err(Error::store)?;

    let mut entries = Vec::with_capacity(standings.len());
    for (index, standing) in standings.into_iter().enumerate() {
      let display_name = self
        .store
        .get_user(standing.user_id)
        .await
        .map_err(Error::store)?
        .map_or_else(|| ANONYMOUS.to_owned(), |u| u.display_name());
      entries.push(LeaderboardEntry {
        rank: index as u32 + 1,
        user_id: standing.user_id,
        display_name,
        count: standing.count,
      });
    }
    Ok(entries)
  }
}
