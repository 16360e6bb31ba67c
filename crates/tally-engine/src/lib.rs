//! Referral attribution, leaderboards and giveaway settlement.
//!
//! Every component is generic over a [`ReferralStore`] and holds it behind an
//! `Arc`; [`Engine`] wires them together over a single store.

pub mod error;
pub mod giveaway;
pub mod identity;
pub mod leaderboard;
pub mod ledger;
pub mod membership;
pub mod scheduler;


use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound as _, Utc};
pub use error::{Error, Result};
use serde::Serialize;
use tally_core::{
  identity::NewGroup,
  membership::MembershipRecord,
  referral::{AttributionOutcome, NewReferral, ReferralEvent, RejectReason},
  store::ReferralStore,
  GroupId, UserId,
};

use crate::{
  giveaway::{GiveawayManager, Recovery},
  identity::IdentityStore,
  leaderboard::LeaderboardAggregator,
  ledger::ReferralLedger,
  membership::MembershipHistory,
};

/// Tunables shared by the engine components.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
  /// How old a membership record must be before a join counts as a re-join.
  pub guard_interval:           Duration,
  /// Leaderboard size when neither the caller nor the group sets one.
  pub default_leaderboard_size: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { guard_interval: Duration::seconds(1), default_leaderboard_size: 10 }
  }
}

/// Result of the join pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
  pub membership:  MembershipRecord,
  /// `None` when the join carried no invite and no pending intent existed.
  pub attribution: Option<AttributionOutcome>,
}

/// Result of following a referral link outside of a group join.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartOutcome {
  /// A personal link without a group: attributed immediately.
  Direct { attribution: AttributionOutcome },
  /// A group link: the intent is stored until the join arrives.
  Pending { event: ReferralEvent },
  /// Nothing was stored.
  Rejected { reason: RejectReason },
}

pub struct Engine<S> {
  identity:    IdentityStore<S>,
  membership:  MembershipHistory<S>,
  ledger:      ReferralLedger<S>,
  giveaways:   GiveawayManager<S>,
  leaderboard: LeaderboardAggregator<S>,
}

impl<S> Clone for Engine<S> {
  fn clone(&self) -> Self {
    Self {
      identity:    self.identity.clone(),
      membership:  self.membership.clone(),
      ledger:      self.ledger.clone(),
      giveaways:   self.giveaways.clone(),
      leaderboard: self.leaderboard.clone(),
    }
  }
}

impl<S: ReferralStore + 'static> Engine<S> {
  pub fn new(store: S, config: EngineConfig) -> Self {
    let store = Arc::new(store);
    let giveaways = GiveawayManager::new(Arc::clone(&store));
    Self {
      identity:    IdentityStore::new(Arc::clone(&store)),
      membership:  MembershipHistory::new(Arc::clone(&store)),
      ledger:      ReferralLedger::new(
        Arc::clone(&store),
        giveaways.clone(),
        config.guard_interval,
      ),
      leaderboard: LeaderboardAggregator::new(store, config.default_leaderboard_size),
      giveaways,
    }
  }

  pub fn identity(&self) -> &IdentityStore<S> { &self.identity }
  pub fn membership(&self) -> &MembershipHistory<S> { &self.membership }
  pub fn ledger(&self) -> &ReferralLedger<S> { &self.ledger }
  pub fn giveaways(&self) -> &GiveawayManager<S> { &self.giveaways }
  pub fn leaderboard(&self) -> &LeaderboardAggregator<S> { &self.leaderboard }

  /// Handle a platform join notification.
  ///
  /// A group seen for the first time is registered with an empty title and
  /// default settings. The first-join record is written before the referrer is looked up, so
  /// a replayed notification always sees it. With `invite_token` the
  /// referrer comes from the link; without one, from the latest pending
  /// intent for `(user, group)`.
  pub async fn on_member_joined(
    &self,
    user_id: UserId,
    group_id: GroupId,
    joined_at: DateTime<Utc>,
    invite_token: Option<&str>,
  ) -> Result<JoinOutcome> {
    let joined_at = joined_at.trunc_subsecs(6);
    self
      .identity
      .get_or_create_group(NewGroup { group_id, title: String::new() })
      .await?;
    let membership = self.membership.record_first_join(user_id, group_id, joined_at).await?;

    let referrer_id = match invite_token {
      Some(token) => Some(self.referrer_for_join(token, group_id).await?),
      None => self
        .ledger
        .latest_pending(user_id, group_id)
        .await?
        .map(|event| event.referrer_id),
    };

    let attribution = match referrer_id {
      Some(referrer_id) => Some(
        self
          .ledger
          .attempt_as_of(NewReferral::new(referrer_id, user_id, Some(group_id)), joined_at)
          .await?,
      ),
      None => None,
    };

    Ok(JoinOutcome { membership, attribution })
  }

  async fn referrer_for_join(&self, token: &str, group_id: GroupId) -> Result<UserId> {
    if let Some((referrer_id, token_group)) = self.identity.resolve_group_token(token).await? {
      if token_group == group_id {
        return Ok(referrer_id);
      }
      tracing::debug!(group_id, token_group, "invite token belongs to another group");
      return Err(Error::InviteLinkUnavailable(token.to_owned()));
    }
    if let Some(referrer_id) = self.identity.resolve_personal_token(token).await? {
      return Ok(referrer_id);
    }
    Err(Error::InviteLinkUnavailable(token.to_owned()))
  }

  /// Follow a referral link opened by `referred_id`.
  ///
  /// A personal token without a group is a direct referral and is
  /// attributed now. A personal token with a group, or a per-group invite
  /// token, is stored as a pending intent and attributed when the join
  /// arrives, unless the user is already a member, in which case the
  /// attempt is evaluated immediately. Unknown tokens leave the ledger
  /// untouched.
  pub async fn attribute_by_token(
    &self,
    referred_id: UserId,
    token: &str,
    group_id: Option<GroupId>,
  ) -> Result<StartOutcome> {
    let (referrer_id, group_id) =
      if let Some(referrer_id) = self.identity.resolve_personal_token(token).await? {
        (referrer_id, group_id)
      } else if let Some((referrer_id, token_group)) =
        self.identity.resolve_group_token(token).await?
      {
        if group_id.is_some_and(|g| g != token_group) {
          return Err(Error::InviteLinkUnavailable(token.to_owned()));
        }
        (referrer_id, Some(token_group))
      } else {
        tracing::debug!(referred_id, "unknown referral token");
        return Err(Error::InviteLinkUnavailable(token.to_owned()));
      };

    let Some(group_id) = group_id else {
      let attribution = self.ledger.attempt_attribution(referrer_id, referred_id, None).await?;
      return Ok(StartOutcome::Direct { attribution });
    };

    if self.membership.first_join(referred_id, group_id).await?.is_some() {
      let attribution =
        self.ledger.attempt_attribution(referrer_id, referred_id, Some(group_id)).await?;
      return Ok(StartOutcome::Direct { attribution });
    }

    match self.ledger.record_pending(referrer_id, referred_id, group_id).await? {
      Some(event) => Ok(StartOutcome::Pending { event }),
      None => Ok(StartOutcome::Rejected { reason: RejectReason::SelfReferral }),
    }
  }

  /// Startup sweep; see [`GiveawayManager::recover`].
  pub async fn recover(&self) -> Result<Recovery> { self.giveaways.recover().await }
}
