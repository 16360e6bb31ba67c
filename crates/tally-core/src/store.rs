//! The `ReferralStore` trait and supporting outcome types.
//!
//! The trait is implemented by storage backends (e.g. `tally-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//!
//! Two operations need true mutual exclusion and must be implemented as
//! storage-level conditional writes, never as read-then-write:
//!
//! - [`ReferralStore::append_referral`] for valid events: at most one valid
//!   event per `(referrer, referred, group)` triple (unique-constraint insert).
//! - [`ReferralStore::settle_giveaway`]: the `active → ended` transition
//!   (compare-and-set).

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  giveaway::{Giveaway, Standing},
  identity::{Group, GroupSettings, NewGroup, NewUser, User},
  membership::MembershipRecord,
  referral::{ReferralEvent, ReferralFilter},
  GroupId, UserId,
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of [`ReferralStore::append_referral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
  Appended(ReferralEvent),
  /// A valid event for the same triple already exists; nothing was written.
  Duplicate,
}

/// Result of [`ReferralStore::create_giveaway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
  Created(Giveaway),
  /// The group's active slot is taken by this giveaway; nothing was written.
  GroupBusy(Uuid),
}

/// Result of [`ReferralStore::claim_group_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClaim {
  /// The token now bound to `(user, group)`; an earlier one if already set.
  Stored(String),
  /// The candidate belongs to another `(user, group)`; nothing was written.
  Taken,
  UnknownUser,
}

/// Result of [`ReferralStore::settle_giveaway`] and of ending a giveaway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "giveaway", rename_all = "snake_case")]
pub enum SettleOutcome {
  /// This call performed the transition.
  Settled(Giveaway),
  /// Another call already ended it; the stored result is returned as-is.
  AlreadyEnded(Giveaway),
}

impl SettleOutcome {
  pub fn giveaway(&self) -> &Giveaway {
    match self {
      Self::Settled(g) | Self::AlreadyEnded(g) => g,
    }
  }

  pub fn into_giveaway(self) -> Giveaway {
    match self {
      Self::Settled(g) | Self::AlreadyEnded(g) => g,
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Tally storage backend.
///
/// Referral events and membership records are create-only. Users, groups and
/// giveaways are mutated only through the narrow operations below.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ReferralStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Insert the user if absent; always return the stored record unmodified.
  fn upsert_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Set the user's personal token to `candidate` unless one is already set.
  /// Returns the stored token, or `None` if the user does not exist.
  fn claim_personal_token(
    &self,
    user_id: UserId,
    candidate: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// Set the user's invite token for `group_id` unless one is already set.
  /// A candidate already bound to another `(user, group)` is not stored.
  fn claim_group_token(
    &self,
    user_id: UserId,
    group_id: GroupId,
    candidate: String,
  ) -> impl Future<Output = Result<TokenClaim, Self::Error>> + Send + '_;

  fn find_personal_token<'a>(
    &'a self,
    token: &'a str,
  ) -> impl Future<Output = Result<Option<UserId>, Self::Error>> + Send + 'a;

  /// Resolve an invite token to its `(owner, group)`.
  fn find_group_token<'a>(
    &'a self,
    token: &'a str,
  ) -> impl Future<Output = Result<Option<(UserId, GroupId)>, Self::Error>> + Send + 'a;

  // ── Groups ────────────────────────────────────────────────────────────

  /// Insert the group if absent; always return the stored record unmodified.
  fn upsert_group(
    &self,
    input: NewGroup,
  ) -> impl Future<Output = Result<Group, Self::Error>> + Send + '_;

  fn get_group(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  /// Replace a group's settings. Returns `None` if the group does not exist.
  fn update_group_settings(
    &self,
    group_id: GroupId,
    settings: GroupSettings,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  // ── Membership ────────────────────────────────────────────────────────

  /// Insert-if-absent. Returns the stored record, which is the earlier one
  /// when the user had already been seen in the group.
  fn record_first_join(
    &self,
    record: MembershipRecord,
  ) -> impl Future<Output = Result<MembershipRecord, Self::Error>> + Send + '_;

  fn get_membership(
    &self,
    user_id: UserId,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Option<MembershipRecord>, Self::Error>> + Send + '_;

  // ── Ledger ────────────────────────────────────────────────────────────

  /// Append an event. For a valid event the insert is conditional on no
  /// valid event existing for the same triple, and the referrer's
  /// `total_referrals` is incremented in the same transaction.
  fn append_referral(
    &self,
    event: ReferralEvent,
  ) -> impl Future<Output = Result<AppendOutcome, Self::Error>> + Send + '_;

  fn find_valid_referral(
    &self,
    referrer_id: UserId,
    referred_id: UserId,
    group_id: Option<GroupId>,
  ) -> impl Future<Output = Result<Option<ReferralEvent>, Self::Error>> + Send + '_;

  /// The most recent pending intent for `referred_id` joining `group_id`.
  fn latest_pending(
    &self,
    referred_id: UserId,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Option<ReferralEvent>, Self::Error>> + Send + '_;

  /// Ledger rows matching `filter`, oldest first.
  fn list_referrals<'a>(
    &'a self,
    filter: &'a ReferralFilter,
  ) -> impl Future<Output = Result<Vec<ReferralEvent>, Self::Error>> + Send + 'a;

  /// Valid events matching `filter`, grouped by referrer and ordered by
  /// [`compare_standings`](crate::giveaway::compare_standings).
  /// `filter.valid_only` is implied.
  fn count_by_referrer<'a>(
    &'a self,
    filter: &'a ReferralFilter,
  ) -> impl Future<Output = Result<Vec<Standing>, Self::Error>> + Send + 'a;

  // ── Giveaways ─────────────────────────────────────────────────────────

  /// Claim the group's active slot and insert the giveaway, atomically.
  /// Fails with a not-found error if the group is not registered.
  fn create_giveaway(
    &self,
    giveaway: Giveaway,
  ) -> impl Future<Output = Result<CreateOutcome, Self::Error>> + Send + '_;

  fn get_giveaway(
    &self,
    giveaway_id: Uuid,
  ) -> impl Future<Output = Result<Option<Giveaway>, Self::Error>> + Send + '_;

  fn list_active_giveaways(
    &self,
  ) -> impl Future<Output = Result<Vec<Giveaway>, Self::Error>> + Send + '_;

  /// Raise `participants[user_id]` to `count` while the giveaway is active.
  /// Never lowers a stored value. Returns `false` if the giveaway has ended
  /// (or does not exist) and nothing was written.
  fn record_progress(
    &self,
    giveaway_id: Uuid,
    user_id: UserId,
    count: u32,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Compare-and-set `active → ended`.
  ///
  /// In the same atomic step, ranks valid referrals into the giveaway's group
  /// over `[started_at, min(ended_at, end_at)]`, stores the winners picked by
  /// [`select_winners`](crate::giveaway::select_winners), replaces
  /// `participants` with the final counts and clears the group's active slot.
  /// When the giveaway had already ended, nothing is written and the stored
  /// giveaway is returned as [`SettleOutcome::AlreadyEnded`].
  fn settle_giveaway(
    &self,
    giveaway_id: Uuid,
    ended_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<SettleOutcome, Self::Error>> + Send + '_;
}
