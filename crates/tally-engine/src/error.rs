//! Error type for `tally-engine`.
//!
//! Attribution rejections are not errors; they come back as
//! [`AttributionOutcome::Rejected`](tally_core::referral::AttributionOutcome).

use tally_core::{GroupId, UserId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] tally_core::Error),

  #[error("user not found: {0}")]
  UserNotFound(UserId),

  #[error("group not found: {0}")]
  GroupNotFound(GroupId),

  #[error("giveaway not found: {0}")]
  GiveawayNotFound(Uuid),

  #[error("group {group_id} already has an active giveaway ({active})")]
  GiveawayAlreadyActive { group_id: GroupId, active: Uuid },

  /// The invite token could not be resolved; no ledger write happened.
  #[error("invite link unavailable: {0}")]
  InviteLinkUnavailable(String),

  #[error("invite token is attached to another user or group: {0}")]
  InviteTokenTaken(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
