//! Handlers for giveaway endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/groups/:id/giveaways` | Body: [`CreateBody`]; 201, or 409 while one is active |
//! | `GET`  | `/groups/:id/giveaway` | The running giveaway; 404 if none |
//! | `GET`  | `/giveaways/:id` | Snapshot with status and awards |
//! | `POST` | `/giveaways/:id/end` | Idempotent; `"outcome"` tells who settled it |
//! | `POST` | `/giveaways/:id/replay` | Rebuild participant counts from the ledger |
//! | `GET`  | `/giveaways/:id/progress/:user` | One referrer's progress |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tally_core::{
  GroupId, UserId,
  giveaway::{Award, Deadline, Giveaway, GiveawaySettings, GiveawayStatus, Progress},
  store::{ReferralStore, SettleOutcome},
};
use tally_engine::Engine;
use uuid::Uuid;

use crate::error::ApiError;

/// A giveaway together with its derived fields.
#[derive(Debug, Serialize)]
pub struct GiveawayView {
  #[serde(flatten)]
  pub giveaway: Giveaway,
  pub status:   GiveawayStatus,
  pub awards:   Vec<Award>,
}

impl From<Giveaway> for GiveawayView {
  fn from(giveaway: Giveaway) -> Self {
    Self { status: giveaway.status(), awards: giveaway.awards(), giveaway }
  }
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `{"creator_id":1,"max_winners":3,"duration_secs":86400}`; `end_at` may be
/// given instead of `duration_secs` and wins if both are present.
#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub creator_id: UserId,
  #[serde(flatten)]
  pub settings:   GiveawaySettings,
  #[serde(flatten)]
  pub deadline:   Deadline,
}

/// `POST /groups/:id/giveaways`
pub async fn create<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReferralStore + 'static,
{
  let giveaway = engine
    .giveaways()
    .create(id, body.creator_id, body.settings, body.deadline)
    .await?;
  Ok((StatusCode::CREATED, Json(GiveawayView::from(giveaway))))
}

// ─── Reads ────────────────────────────────────────────────────────────────────

/// `GET /groups/:id/giveaway`
pub async fn active<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<GroupId>,
) -> Result<Json<GiveawayView>, ApiError>
where
  S: ReferralStore + 'static,
{
  let giveaway = engine
    .giveaways()
    .active_for(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("no active giveaway in group {id}")))?;
  Ok(Json(giveaway.into()))
}

/// `GET /giveaways/:id`
pub async fn get_one<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<GiveawayView>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.giveaways().get(id).await?.into()))
}

#[derive(Debug, Serialize)]
pub struct ProgressView {
  #[serde(flatten)]
  pub progress:  Progress,
  pub remaining: Option<u32>,
  pub reached:   Option<bool>,
}

/// `GET /giveaways/:id/progress/:user`
pub async fn progress<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path((id, user)): Path<(Uuid, UserId)>,
) -> Result<Json<ProgressView>, ApiError>
where
  S: ReferralStore + 'static,
{
  let progress = engine.giveaways().progress(id, user).await?;
  Ok(Json(ProgressView {
    remaining: progress.remaining(),
    reached: progress.reached(),
    progress,
  }))
}

// ─── Settlement ───────────────────────────────────────────────────────────────

/// `POST /giveaways/:id/end`
pub async fn end<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SettleOutcome>, ApiError>
where
  S: ReferralStore + 'static,
{
  let giveaway = engine.giveaways().get(id).await?;
  Ok(Json(engine.giveaways().end(giveaway.group_id, id).await?))
}

/// `POST /giveaways/:id/replay`
pub async fn replay<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<GiveawayView>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.giveaways().replay_progress(id).await?.into()))
}
