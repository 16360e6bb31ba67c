//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microseconds,
//! so lexical comparison in SQL matches chronological order. Settings and
//! winner lists are stored as compact JSON. UUIDs are stored as hyphenated
//! lowercase strings.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tally_core::{
  giveaway::{Giveaway, GiveawaySettings, Standing},
  identity::{Group, GroupSettings, User},
  membership::MembershipRecord,
  referral::ReferralEvent,
  UserId,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Counts ──────────────────────────────────────────────────────────────────

pub fn decode_count(n: i64) -> Result<u32> {
  u32::try_from(n).map_err(|_| Error::OutOfRange(n))
}

/// `LIMIT -1` is SQLite for "no limit".
pub fn encode_limit(limit: Option<usize>) -> i64 {
  limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1)
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_group_settings(s: &GroupSettings) -> Result<String> {
  Ok(serde_json::to_string(s)?)
}

pub fn encode_giveaway_settings(s: &GiveawaySettings) -> Result<String> {
  Ok(serde_json::to_string(s)?)
}

pub fn encode_winners(winners: &[UserId]) -> Result<String> {
  Ok(serde_json::to_string(winners)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from a `users` row plus its `user_group_tokens` rows.
pub struct RawUser {
  pub user_id:         i64,
  pub first_name:      Option<String>,
  pub username:        Option<String>,
  pub registered_at:   String,
  pub total_referrals: i64,
  pub personal_token:  Option<String>,
  pub group_tokens:    Vec<(i64, String)>,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:         self.user_id,
      first_name:      self.first_name,
      username:        self.username,
      registered_at:   decode_dt(&self.registered_at)?,
      total_referrals: u64::try_from(self.total_referrals)
        .map_err(|_| Error::OutOfRange(self.total_referrals))?,
      personal_token:  self.personal_token,
      group_tokens:    self.group_tokens.into_iter().collect(),
    })
  }
}

/// Raw values read from a `groups` row.
pub struct RawGroup {
  pub group_id:           i64,
  pub title:              String,
  pub settings:           String,
  pub registered_at:      String,
  pub active_giveaway_id: Option<String>,
}

impl RawGroup {
  pub fn into_group(self) -> Result<Group> {
    Ok(Group {
      group_id:           self.group_id,
      title:              self.title,
      settings:           serde_json::from_str(&self.settings)?,
      registered_at:      decode_dt(&self.registered_at)?,
      active_giveaway_id: self
        .active_giveaway_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
    })
  }
}

/// Raw values read from a `memberships` row.
pub struct RawMembership {
  pub user_id:         i64,
  pub group_id:        i64,
  pub first_joined_at: String,
}

impl RawMembership {
  pub fn into_record(self) -> Result<MembershipRecord> {
    Ok(MembershipRecord {
      user_id:         self.user_id,
      group_id:        self.group_id,
      first_joined_at: decode_dt(&self.first_joined_at)?,
    })
  }
}

/// Raw values read from a `referral_events` row.
pub struct RawReferral {
  pub event_id:    String,
  pub referrer_id: i64,
  pub referred_id: i64,
  pub group_id:    Option<i64>,
  pub recorded_at: String,
  pub valid:       bool,
  pub reason:      Option<String>,
  pub kind:        String,
}

impl RawReferral {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:    row.get(0)?,
      referrer_id: row.get(1)?,
      referred_id: row.get(2)?,
      group_id:    row.get(3)?,
      recorded_at: row.get(4)?,
      valid:       row.get(5)?,
      reason:      row.get(6)?,
      kind:        row.get(7)?,
    })
  }

  pub fn into_event(self) -> Result<ReferralEvent> {
    Ok(ReferralEvent {
      event_id:    decode_uuid(&self.event_id)?,
      referrer_id: self.referrer_id,
      referred_id: self.referred_id,
      group_id:    self.group_id,
      recorded_at: decode_dt(&self.recorded_at)?,
      valid:       self.valid,
      reason:      self.reason.as_deref().map(str::parse).transpose()?,
      kind:        self.kind.parse()?,
    })
  }
}

/// Column list matching [`RawReferral::from_row`].
pub const REFERRAL_COLUMNS: &str =
  "event_id, referrer_id, referred_id, group_id, recorded_at, valid, reason, kind";

/// Raw values read from an aggregate `count_by_referrer` row.
pub struct RawStanding {
  pub user_id:    i64,
  pub count:      i64,
  pub reached_at: String,
}

impl RawStanding {
  pub fn into_standing(self) -> Result<Standing> {
    Ok(Standing {
      user_id:    self.user_id,
      count:      decode_count(self.count)?,
      reached_at: decode_dt(&self.reached_at)?,
    })
  }
}

/// Raw values read from a `giveaways` row plus its participants.
pub struct RawGiveaway {
  pub giveaway_id:  String,
  pub group_id:     i64,
  pub creator_id:   i64,
  pub settings:     String,
  pub started_at:   String,
  pub end_at:       String,
  pub active:       bool,
  pub ended_at:     Option<String>,
  pub winners:      String,
  pub participants: Vec<(i64, i64)>,
}

impl RawGiveaway {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      giveaway_id:  row.get(0)?,
      group_id:     row.get(1)?,
      creator_id:   row.get(2)?,
      settings:     row.get(3)?,
      started_at:   row.get(4)?,
      end_at:       row.get(5)?,
      active:       row.get(6)?,
      ended_at:     row.get(7)?,
      winners:      row.get(8)?,
      participants: Vec::new(),
    })
  }

  pub fn into_giveaway(self) -> Result<Giveaway> {
    let participants = self
      .participants
      .into_iter()
      .map(|(user_id, n)| Ok((user_id, decode_count(n)?)))
      .collect::<Result<BTreeMap<UserId, u32>>>()?;

    Ok(Giveaway {
      giveaway_id: decode_uuid(&self.giveaway_id)?,
      group_id: self.group_id,
      creator_id: self.creator_id,
      settings: serde_json::from_str(&self.settings)?,
      started_at: decode_dt(&self.started_at)?,
      end_at: decode_dt(&self.end_at)?,
      active: self.active,
      ended_at: self.ended_at.as_deref().map(decode_dt).transpose()?,
      participants,
      winners: serde_json::from_str(&self.winners)?,
    })
  }
}

/// Column list matching [`RawGiveaway::from_row`].
pub const GIVEAWAY_COLUMNS: &str =
  "giveaway_id, group_id, creator_id, settings, started_at, end_at, active, ended_at, winners";

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone as _;

  #[test]
  fn timestamps_are_fixed_width_and_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let b = a + chrono::Duration::microseconds(1);
    let (ea, eb) = (encode_dt(a), encode_dt(b));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn missing_limit_is_unbounded() {
    assert_eq!(encode_limit(None), -1);
    assert_eq!(encode_limit(Some(5)), 5);
  }
}
