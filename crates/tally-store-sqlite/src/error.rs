//! Error type for `tally-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown discriminant: {0}")]
  Discriminant(#[from] strum::ParseError),

  #[error("stored value out of range: {0}")]
  OutOfRange(i64),

  #[error("group not found: {0}")]
  GroupNotFound(i64),

  #[error("giveaway not found: {0}")]
  GiveawayNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
