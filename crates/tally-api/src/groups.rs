//! Handlers for `/groups` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/groups` | Body: [`NewGroup`]; idempotent |
//! | `GET`  | `/groups/:id` | 404 if not found |
//! | `PUT`  | `/groups/:id/settings` | Body: [`GroupSettings`] |
//! | `POST` | `/groups/:id/invites` | Body: [`InviteBody`]; first token stored wins; 409 if held elsewhere |
//! | `POST` | `/groups/:id/joins` | Body: [`JoinBody`]; runs the join pipeline |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tally_core::{
  GroupId, UserId,
  identity::{Group, GroupSettings, NewGroup, NewUser},
  store::ReferralStore,
};
use tally_engine::{Engine, JoinOutcome};

use crate::{error::ApiError, users::TokenBody};

/// `POST /groups`
pub async fn upsert<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<NewGroup>,
) -> Result<Json<Group>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.identity().get_or_create_group(body).await?))
}

/// `GET /groups/:id`
pub async fn get_one<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
) -> Result<Json<Group>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.identity().group(id).await?))
}

/// `PUT /groups/:id/settings`
pub async fn update_settings<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
  Json(body): Json<GroupSettings>,
) -> Result<Json<Group>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.identity().update_group_settings(id, body).await?))
}

// ─── Invites ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InviteBody {
  pub user_id: UserId,
  /// Opaque invite link token created by the platform.
  pub token:   String,
}

/// `POST /groups/:id/invites`: returns the token actually stored.
pub async fn invite<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
  Json(body): Json<InviteBody>,
) -> Result<Json<TokenBody>, ApiError>
where
  S: ReferralStore + 'static,
{
  if body.token.is_empty() {
    return Err(ApiError::BadRequest("token must not be empty".into()));
  }
  let token = engine.identity().group_token(body.user_id, id, body.token).await?;
  Ok(Json(TokenBody { token }))
}

// ─── Joins ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JoinBody {
  pub user_id:      UserId,
  #[serde(default)]
  pub first_name:   Option<String>,
  #[serde(default)]
  pub username:     Option<String>,
  /// Group title, used only if the group is not registered yet.
  #[serde(default)]
  pub title:        Option<String>,
  /// When the platform observed the join. Defaults to now.
  #[serde(default)]
  pub joined_at:    Option<DateTime<Utc>>,
  /// The invite link the user came through, if the platform reports one.
  #[serde(default)]
  pub invite_token: Option<String>,
}

/// `POST /groups/:id/joins`
pub async fn join<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
  Json(body): Json<JoinBody>,
) -> Result<Json<JoinOutcome>, ApiError>
where
  S: ReferralStore + 'static,
{
  engine
    .identity()
    .get_or_create_user(NewUser {
      user_id:    body.user_id,
      first_name: body.first_name,
      username:   body.username,
    })
    .await?;
  if let Some(title) = body.title {
    engine.identity().get_or_create_group(NewGroup { group_id: id, title }).await?;
  }

  let joined_at = body.joined_at.unwrap_or_else(tally_core::now);
  let outcome = engine
    .on_member_joined(body.user_id, id, joined_at, body.invite_token.as_deref())
    .await?;
  Ok(Json(outcome))
}
