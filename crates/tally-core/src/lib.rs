//! Core types and trait definitions for the Tally referral tracker.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod error;
pub mod giveaway;
pub mod identity;
pub mod leaderboard;
pub mod membership;
pub mod referral;
pub mod store;

use chrono::{DateTime, SubsecRound as _, Utc};

pub use error::{Error, Result};

/// Platform-assigned user identifier.
pub type UserId = i64;

/// Platform-assigned group (chat) identifier.
pub type GroupId = i64;

/// The current time, truncated to the microsecond precision stores persist,
/// so that values read back compare equal to values written.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }
