//! Error types for `tally-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid giveaway settings: {0}")]
  InvalidSettings(String),

  #[error("giveaway deadline {0} is not in the future")]
  DeadlineInPast(DateTime<Utc>),

  #[error("giveaway needs either an end time or a duration")]
  MissingDeadline,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
