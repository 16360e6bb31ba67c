//! Referral events: the append-only attribution ledger.
//!
//! Every attempt that gets past the self-referral check is written, whether
//! it is accepted or not; invalid rows are kept for audit. Events are never
//! updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{GroupId, UserId};

// ─── Discriminants ───────────────────────────────────────────────────────────

/// How the referred user arrived.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferralKind {
  /// Opened the bot through a personal link; no group involved.
  Direct,
  /// Joined a group through a referrer's invite.
  Group,
  /// Opened a referrer's link for a group they have not joined yet.
  /// Never counts; resolved into a `Group` attempt when the join arrives.
  Pending,
}

/// Why an attribution attempt was not accepted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
  SelfReferral,
  PreviouslyJoined,
  Duplicate,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// The attribution an adapter asks the ledger to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReferral {
  pub referrer_id: UserId,
  pub referred_id: UserId,
  pub group_id:    Option<GroupId>,
  pub kind:        ReferralKind,
}

impl NewReferral {
  /// A `Direct` attempt without a group, `Group` otherwise.
  pub fn new(referrer_id: UserId, referred_id: UserId, group_id: Option<GroupId>) -> Self {
    let kind = if group_id.is_some() { ReferralKind::Group } else { ReferralKind::Direct };
    Self { referrer_id, referred_id, group_id, kind }
  }

  pub fn is_self_referral(&self) -> bool { self.referrer_id == self.referred_id }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEvent {
  pub event_id:    Uuid,
  pub referrer_id: UserId,
  pub referred_id: UserId,
  pub group_id:    Option<GroupId>,
  pub recorded_at: DateTime<Utc>,
  pub valid:       bool,
  pub reason:      Option<RejectReason>,
  pub kind:        ReferralKind,
}

impl ReferralEvent {
  fn build(
    input: NewReferral,
    valid: bool,
    reason: Option<RejectReason>,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      referrer_id: input.referrer_id,
      referred_id: input.referred_id,
      group_id: input.group_id,
      recorded_at: at,
      valid,
      reason,
      kind: input.kind,
    }
  }

  /// A counting event.
  pub fn accepted(input: NewReferral, at: DateTime<Utc>) -> Self {
    Self::build(input, true, None, at)
  }

  /// An audit-only event recording why the attempt was turned down.
  pub fn rejected(input: NewReferral, reason: RejectReason, at: DateTime<Utc>) -> Self {
    Self::build(input, false, Some(reason), at)
  }

  /// An intent awaiting the referred user's group join.
  pub fn pending(referrer_id: UserId, referred_id: UserId, group_id: GroupId, at: DateTime<Utc>) -> Self {
    let input = NewReferral {
      referrer_id,
      referred_id,
      group_id: Some(group_id),
      kind: ReferralKind::Pending,
    };
    Self::build(input, false, None, at)
  }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of an attribution attempt. Rejections are ordinary values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttributionOutcome {
  Accepted { event: ReferralEvent },
  Rejected { reason: RejectReason },
}

impl AttributionOutcome {
  pub fn is_accepted(&self) -> bool { matches!(self, Self::Accepted { .. }) }

  pub fn reason(&self) -> Option<RejectReason> {
    match self {
      Self::Accepted { .. } => None,
      Self::Rejected { reason } => Some(*reason),
    }
  }
}

// ─── Query type ──────────────────────────────────────────────────────────────

/// Filter over ledger rows. `None` fields do not constrain the query.
///
/// `since` and `until` are both inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralFilter {
  pub referrer_id: Option<UserId>,
  pub referred_id: Option<UserId>,
  pub group_id:    Option<GroupId>,
  pub kind:        Option<ReferralKind>,
  #[serde(default)]
  pub valid_only:  bool,
  pub since:       Option<DateTime<Utc>>,
  pub until:       Option<DateTime<Utc>>,
  pub limit:       Option<usize>,
}

impl ReferralFilter {
  /// Only valid (counting) events.
  pub fn valid() -> Self {
    Self { valid_only: true, ..Default::default() }
  }

  pub fn in_group(mut self, group_id: GroupId) -> Self {
    self.group_id = Some(group_id);
    self
  }

  pub fn by_referrer(mut self, referrer_id: UserId) -> Self {
    self.referrer_id = Some(referrer_id);
    self
  }

  pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
    self.since = Some(since);
    self.until = Some(until);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}
