//! [`ReferralLedger`]: evaluates attribution attempts and appends them to
//! the append-only ledger.
//!
//! Decision order for an attempt `(referrer, referred, group?)`:
//!
//! 1. `referrer == referred` → rejected `self_referral`, nothing written.
//! 2. With a group, a membership record older than the guard interval →
//!    rejected `previously_joined`, an invalid event is written for audit.
//! 3. A valid event for the triple already exists → rejected `duplicate`.
//! 4. Otherwise a valid event is appended. The store makes this insert
//!    conditional on the triple, so of any number of concurrent attempts
//!    exactly one is accepted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tally_core::{
  referral::{AttributionOutcome, NewReferral, ReferralEvent, ReferralFilter, RejectReason},
  store::{AppendOutcome, ReferralStore},
  GroupId, UserId,
};

use crate::{giveaway::GiveawayManager, Error, Result};

pub struct ReferralLedger<S> {
  store:     Arc<S>,
  giveaways: GiveawayManager<S>,
  guard:     Duration,
}

impl<S> Clone for ReferralLedger<S> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      giveaways: self.giveaways.clone(),
      guard:     self.guard,
    }
  }
}

impl<S: ReferralStore + 'static> ReferralLedger<S> {
  pub fn new(store: Arc<S>, giveaways: GiveawayManager<S>, guard: Duration) -> Self {
    Self { store, giveaways, guard }
  }

  /// Evaluate an attempt; `Direct` without a group, `Group` with one.
  pub async fn attempt_attribution(
    &self,
    referrer_id: UserId,
    referred_id: UserId,
    group_id: Option<GroupId>,
  ) -> Result<AttributionOutcome> {
    self.attempt(NewReferral::new(referrer_id, referred_id, group_id)).await
  }

  pub async fn attempt(&self, input: NewReferral) -> Result<AttributionOutcome> {
    self.attempt_as_of(input, tally_core::now()).await
  }

  /// Like [`attempt`](Self::attempt), but the guard interval is measured
  /// from `joined_at`, the time the join being attributed was observed,
  /// instead of from now. Join notifications may arrive late.
  pub async fn attempt_as_of(
    &self,
    input: NewReferral,
    joined_at: DateTime<Utc>,
  ) -> Result<AttributionOutcome> {
    if input.is_self_referral() {
      tracing::debug!(user_id = input.referrer_id, "self-referral ignored");
      return Ok(reject(RejectReason::SelfReferral));
    }

    let now = tally_core::now();

    if let Some(group_id) = input.group_id {
      let membership = self
        .store
        .get_membership(input.referred_id, group_id)
        .await
        .map_err(Error::store)?;
      if membership.is_some_and(|m| m.predates(joined_at, self.guard)) {
        let event = ReferralEvent::rejected(input, RejectReason::PreviouslyJoined, now);
        self.store.append_referral(event).await.map_err(Error::store)?;
        tracing::info!(
          referrer_id = input.referrer_id,
          referred_id = input.referred_id,
          group_id,
          "referral rejected: previously joined"
        );
        return Ok(reject(RejectReason::PreviouslyJoined));
      }
    }

    let existing = self
      .store
      .find_valid_referral(input.referrer_id, input.referred_id, input.group_id)
      .await
      .map_err(Error::store)?;
    if existing.is_some() {
      tracing::debug!(
        referrer_id = input.referrer_id,
        referred_id = input.referred_id,
        group_id = ?input.group_id,
        "referral rejected: duplicate"
      );
      return Ok(reject(RejectReason::Duplicate));
    }

    let event = match self
      .store
      .append_referral(ReferralEvent::accepted(input, now))
      .await
      .map_err(Error::store)?
    {
      AppendOutcome::Appended(event) => event,
      // Lost the race against a concurrent attempt for the same triple.
      AppendOutcome::Duplicate => return Ok(reject(RejectReason::Duplicate)),
    };

    tracing::info!(
      referrer_id = event.referrer_id,
      referred_id = event.referred_id,
      group_id = ?event.group_id,
      kind = %event.kind,
      "referral accepted"
    );

    if let Some(group_id) = event.group_id {
      // The event is committed; a failed refresh only delays the projection,
      // which the next refresh or a replay rebuilds from the ledger.
      if let Err(e) = self.giveaways.refresh_progress(group_id, event.referrer_id).await {
        tracing::warn!(group_id, referrer_id = event.referrer_id, error = %e, "progress refresh failed");
      }
    }

    Ok(AttributionOutcome::Accepted { event })
  }

  /// Record that `referred_id` opened `referrer_id`'s link for a group they
  /// have not joined yet. Returns `None` for a self-referral.
  pub async fn record_pending(
    &self,
    referrer_id: UserId,
    referred_id: UserId,
    group_id: GroupId,
  ) -> Result<Option<ReferralEvent>> {
    if referrer_id == referred_id {
      return Ok(None);
    }
    let event = ReferralEvent::pending(referrer_id, referred_id, group_id, tally_core::now());
    match self.store.append_referral(event).await.map_err(Error::store)? {
      AppendOutcome::Appended(event) => {
        tracing::debug!(referrer_id, referred_id, group_id, "pending referral recorded");
        Ok(Some(event))
      }
      AppendOutcome::Duplicate => Ok(None),
    }
  }

  /// The most recent pending intent for `(referred, group)`.
  pub async fn latest_pending(
    &self,
    referred_id: UserId,
    group_id: GroupId,
  ) -> Result<Option<ReferralEvent>> {
    self.store.latest_pending(referred_id, group_id).await.map_err(Error::store)
  }

  /// Audit listing of ledger rows, valid and invalid.
  pub async fn history(&self, filter: &ReferralFilter) -> Result<Vec<ReferralEvent>> {
    self.store.list_referrals(filter).await.map_err(Error::store)
  }
}

fn reject(reason: RejectReason) -> AttributionOutcome {
  AttributionOutcome::Rejected { reason }
}
