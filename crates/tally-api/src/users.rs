//! Handlers for `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/users` | Body: [`NewUser`]; idempotent, returns the stored user |
//! | `GET`  | `/users/:id` | 404 if not found |
//! | `POST` | `/users/:id/token` | Personal referral token, generated once |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Serialize;
use tally_core::{
  UserId,
  identity::{NewUser, User},
  store::ReferralStore,
};
use tally_engine::Engine;

use crate::error::ApiError;

/// `POST /users`
pub async fn upsert<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<NewUser>,
) -> Result<Json<User>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.identity().get_or_create_user(body).await?))
}

/// `GET /users/:id`
pub async fn get_one<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<UserId>,
) -> Result<Json<User>, ApiError>
where
  S: ReferralStore + 'static,
{
  Ok(Json(engine.identity().user(id).await?))
}

#[derive(Debug, Serialize)]
pub struct TokenBody {
  pub token: String,
}

/// `POST /users/:id/token`
pub async fn token<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<UserId>,
) -> Result<Json<TokenBody>, ApiError>
where
  S: ReferralStore + 'static,
{
  let token = engine.identity().personal_token(id).await?;
  Ok(Json(TokenBody { token }))
}
