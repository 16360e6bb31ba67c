//! Handler for `GET /leaderboard`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tally_core::{
  GroupId,
  leaderboard::{LeaderboardEntry, Scope, Window},
  store::ReferralStore,
};
use tally_engine::Engine;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
  /// Rank one group; omit for the global board.
  pub group_id: Option<GroupId>,
  pub since:    Option<DateTime<Utc>>,
  pub until:    Option<DateTime<Utc>>,
  pub limit:    Option<usize>,
}

impl LeaderboardParams {
  fn scope(&self) -> Result<Scope, ApiError> {
    let window = match (self.since, self.until) {
      (Some(since), until) => Some(Window { since, until }),
      (None, Some(_)) => {
        return Err(ApiError::BadRequest("`until` requires `since`".into()));
      }
      (None, None) => None,
    };
    match self.group_id {
      Some(group_id) => Ok(Scope::Group { group_id, window }),
      None if window.is_some() => {
        Err(ApiError::BadRequest("a window needs a `group_id`".into()))
      }
      None => Ok(Scope::Global),
    }
  }
}

/// `GET /leaderboard[?group_id=..][&since=..][&until=..][&limit=..]`
pub async fn handler<S>(
  State(engine): State<Arc<Engine<S>>>,
  Query(params): Query<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError>
where
  S: ReferralStore + 'static,
{
  let scope = params.scope()?;
  Ok(Json(engine.leaderboard().rank(scope, params.limit).await?))
}
