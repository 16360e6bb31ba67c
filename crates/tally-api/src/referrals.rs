//! Handlers for `/referrals` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/referrals` | Body: [`AttemptBody`]; rejections are `200` with `"outcome":"rejected"` |
//! | `POST` | `/referrals/start` | Body: [`StartBody`]; 404 for unknown tokens |
//! | `GET`  | `/referrals` | Audit listing; query fields of [`ReferralFilter`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;
use tally_core::{
  GroupId, UserId,
  referral::{AttributionOutcome, ReferralEvent, ReferralFilter},
  store::ReferralStore,
};
use tally_engine::{Engine, StartOutcome};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AttemptBody {
  pub referrer_id: UserId,
  pub referred_id: UserId,
  #[serde(default)]
  pub group_id:    Option<GroupId>,
}

/// `POST /referrals`
pub async fn attempt<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<AttemptBody>,
) -> Result<Json<AttributionOutcome>, ApiError>
where
  S: ReferralStore + 'static,
{
  let outcome = engine
    .ledger()
    .attempt_attribution(body.referrer_id, body.referred_id, body.group_id)
    .await?;
  Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
  /// The user who opened the link.
  pub user_id:  UserId,
  pub token:    String,
  #[serde(default)]
  pub group_id: Option<GroupId>,
}

/// `POST /referrals/start`
pub async fn start<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<StartBody>,
) -> Result<Json<StartOutcome>, ApiError>
where
  S: ReferralStore + 'static,
{
  let outcome = engine
    .attribute_by_token(body.user_id, &body.token, body.group_id)
    .await?;
  Ok(Json(outcome))
}

/// `GET /referrals[?referrer_id=..][&group_id=..][&valid_only=true][&since=..][&until=..][&limit=..]`
pub async fn history<S>(
  State(engine): State<Arc<Engine<S>>>,
  Query(filter): Query<ReferralFilter>,
) -> Result<Json<Vec<ReferralEvent>>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.ledger().history(&filter).await?))
}
