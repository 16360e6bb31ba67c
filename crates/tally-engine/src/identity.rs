//! [`IdentityStore`]: user/group registries and one-time token issuance.

use std::sync::Arc;

use rand_core::{OsRng, RngCore as _};
use tally_core::{
  identity::{Group, GroupSettings, NewGroup, NewUser, User},
  store::{ReferralStore, TokenClaim},
  GroupId, UserId,
};

use crate::{Error, Result};

/// Length in bytes of generated personal tokens (hex-encoded on the wire).
const TOKEN_BYTES: usize = 12;

fn generate_token() -> String {
  let mut bytes = [0u8; TOKEN_BYTES];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

pub struct IdentityStore<S> {
  store: Arc<S>,
}

impl<S> Clone for IdentityStore<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ReferralStore> IdentityStore<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Idempotent upsert; a known user is returned unmodified.
  pub async fn get_or_create_user(&self, input: NewUser) -> Result<User> {
    self.store.upsert_user(input).await.map_err(Error::store)
  }

  /// Idempotent upsert; a known group is returned unmodified.
  pub async fn get_or_create_group(&self, input: NewGroup) -> Result<Group> {
    self.store.upsert_group(input).await.map_err(Error::store)
  }

  pub async fn user(&self, user_id: UserId) -> Result<User> {
    self
      .store
      .get_user(user_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::UserNotFound(user_id))
  }

  pub async fn group(&self, group_id: GroupId) -> Result<Group> {
    self
      .store
      .get_group(group_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GroupNotFound(group_id))
  }

  pub async fn update_group_settings(
    &self,
    group_id: GroupId,
    settings: GroupSettings,
  ) -> Result<Group> {
    if settings.leaderboard_size == 0 {
      return Err(tally_core::Error::InvalidSettings("leaderboard_size must be at least 1".into()).into());
    }
    let group = self
      .store
      .update_group_settings(group_id, settings)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GroupNotFound(group_id))?;
    tracing::info!(group_id, "group settings updated");
    Ok(group)
  }

  /// The user's personal referral token, generated on first request.
  ///
  /// Concurrent first requests race on a set-once write; every caller gets
  /// the token that won.
  pub async fn personal_token(&self, user_id: UserId) -> Result<String> {
    let user = self.user(user_id).await?;
    if let Some(token) = user.personal_token {
      return Ok(token);
    }
    let token = self
      .store
      .claim_personal_token(user_id, generate_token())
      .await
      .map_err(Error::store)?
      .ok_or(Error::UserNotFound(user_id))?;
    tracing::debug!(user_id, "personal token issued");
    Ok(token)
  }

  /// Attach a platform-materialised invite link to `(user, group)`.
  ///
  /// The first token stored wins; later calls return it and drop `token`.
  /// A token already attached to another user or group is refused.
  pub async fn group_token(&self, user_id: UserId, group_id: GroupId, token: String) -> Result<String> {
    match self
      .store
      .claim_group_token(user_id, group_id, token.clone())
      .await
      .map_err(Error::store)?
    {
      TokenClaim::Stored(stored) => Ok(stored),
      TokenClaim::Taken => {
        tracing::debug!(user_id, group_id, "invite token already attached elsewhere");
        Err(Error::InviteTokenTaken(token))
      }
      TokenClaim::UnknownUser => Err(Error::UserNotFound(user_id)),
    }
  }

  pub async fn resolve_personal_token(&self, token: &str) -> Result<Option<UserId>> {
    self.store.find_personal_token(token).await.map_err(Error::store)
  }

  pub async fn resolve_group_token(&self, token: &str) -> Result<Option<(UserId, GroupId)>> {
    self.store.find_group_token(token).await.map_err(Error::store)
  }
}
