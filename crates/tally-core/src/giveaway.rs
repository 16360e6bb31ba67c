//! Giveaways: time-boxed referral contests settled exactly once.
//!
//! A giveaway is `Active` from creation until its single settlement
//! transition, after which it is frozen as `Ended`. `end_at` is fixed at
//! creation. `participants` is a materialised view over the ledger and can
//! always be rebuilt from it.

use std::{cmp::Ordering, collections::BTreeMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, GroupId, Result, UserId};

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiveawaySettings {
  /// Referral goal shown to participants. `None` means unbounded: progress
  /// is reported as a raw count with no target comparison.
  #[serde(default)]
  pub target_referrals: Option<u32>,
  pub max_winners:      u32,
  /// Prize descriptions by place; `prizes[0]` goes to the first winner.
  #[serde(default)]
  pub prizes:           Vec<String>,
}

impl GiveawaySettings {
  pub fn validate(&self) -> Result<()> {
    if self.max_winners == 0 {
      return Err(Error::InvalidSettings("max_winners must be at least 1".into()));
    }
    if self.target_referrals == Some(0) {
      return Err(Error::InvalidSettings(
        "target_referrals must be positive; omit it for an unbounded contest".into(),
      ));
    }
    Ok(())
  }
}

/// When a new giveaway should close. An explicit `end_at` takes precedence
/// over `duration_secs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
  pub end_at:        Option<DateTime<Utc>>,
  pub duration_secs: Option<u64>,
}

impl Deadline {
  pub fn at(end_at: DateTime<Utc>) -> Self {
    Self { end_at: Some(end_at), duration_secs: None }
  }

  pub fn after(duration: Duration) -> Self {
    let secs = duration.num_seconds().max(0) as u64;
    Self { end_at: None, duration_secs: Some(secs) }
  }

  /// Compute the fixed end time relative to `now`.
  pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let end_at = match (self.end_at, self.duration_secs) {
      (Some(end_at), _) => end_at,
      (None, Some(secs)) => i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| Error::InvalidSettings(format!("duration too large: {secs}s")))?,
      (None, None) => return Err(Error::MissingDeadline),
    };
    if end_at <= now {
      return Err(Error::DeadlineInPast(end_at));
    }
    Ok(end_at)
  }
}

// ─── Giveaway ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveawayStatus {
  Active,
  Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Giveaway {
  pub giveaway_id:  Uuid,
  pub group_id:     GroupId,
  pub creator_id:   UserId,
  pub settings:     GiveawaySettings,
  pub started_at:   DateTime<Utc>,
  pub end_at:       DateTime<Utc>,
  pub active:       bool,
  pub ended_at:     Option<DateTime<Utc>>,
  /// Referrer → valid referrals inside the contest window.
  pub participants: BTreeMap<UserId, u32>,
  /// Ordered winners, first place first. Empty while active.
  pub winners:      Vec<UserId>,
}

impl Giveaway {
  pub fn new(
    group_id: GroupId,
    creator_id: UserId,
    settings: GiveawaySettings,
    started_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
  ) -> Self {
    Self {
      giveaway_id: Uuid::new_v4(),
      group_id,
      creator_id,
      settings,
      started_at,
      end_at,
      active: true,
      ended_at: None,
      participants: BTreeMap::new(),
      winners: Vec::new(),
    }
  }

  pub fn status(&self) -> GiveawayStatus {
    if self.active { GiveawayStatus::Active } else { GiveawayStatus::Ended }
  }

  /// Still active although the deadline has passed; settlement is owed.
  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    self.active && self.end_at <= now
  }

  /// Upper bound of the counting window as seen at `now`.
  pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now.min(self.end_at)
  }

  pub fn progress(&self, user_id: UserId) -> Progress {
    Progress {
      user_id,
      count: self.participants.get(&user_id).copied().unwrap_or(0),
      target: self.settings.target_referrals,
    }
  }

  /// Winners paired with their place, referral count and prize.
  pub fn awards(&self) -> Vec<Award> {
    self
      .winners
      .iter()
      .enumerate()
      .map(|(i, &user_id)| Award {
        place: i as u32 + 1,
        user_id,
        count: self.participants.get(&user_id).copied().unwrap_or(0),
        prize: self.settings.prizes.get(i).cloned(),
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
  pub place:   u32,
  pub user_id: UserId,
  pub count:   u32,
  pub prize:   Option<String>,
}

// ─── Progress ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  pub user_id: UserId,
  pub count:   u32,
  /// `None` for unbounded contests.
  pub target:  Option<u32>,
}

impl Progress {
  /// Referrals still missing; `None` when there is no target.
  pub fn remaining(&self) -> Option<u32> {
    self.target.map(|t| t.saturating_sub(self.count))
  }

  /// Whether the target is met; `None` when there is no target.
  pub fn reached(&self) -> Option<bool> {
    self.target.map(|t| self.count >= t)
  }
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

/// One referrer's aggregate inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
  pub user_id:    UserId,
  pub count:      u32,
  /// Timestamp of the referrer's last counted event, i.e. the moment they
  /// reached `count`.
  pub reached_at: DateTime<Utc>,
}

/// Ranking order: higher count first; on equal counts whoever reached that
/// count earlier wins; remaining ties go to the lower user id.
pub fn compare_standings(a: &Standing, b: &Standing) -> Ordering {
  b.count
    .cmp(&a.count)
    .then(a.reached_at.cmp(&b.reached_at))
    .then(a.user_id.cmp(&b.user_id))
}

/// Pick up to `max_winners` referrers with a positive count, in ranking order.
pub fn select_winners(mut standings: Vec<Standing>, max_winners: u32) -> Vec<Standing> {
  standings.retain(|s| s.count > 0);
  standings.sort_by(compare_standings);
  standings.truncate(max_winners as usize);
  standings
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings(max_winners: u32) -> GiveawaySettings {
    GiveawaySettings { target_referrals: None, max_winners, prizes: vec![] }
  }

  fn standing(user_id: UserId, count: u32, reached_at: DateTime<Utc>) -> Standing {
    Standing { user_id, count, reached_at }
  }

  #[test]
  fn explicit_end_time_beats_duration() {
    let now = Utc::now();
    let end = now + Duration::hours(5);
    let deadline = Deadline { end_at: Some(end), duration_secs: Some(60) };
    assert_eq!(deadline.resolve(now).unwrap(), end);
  }

  #[test]
  fn duration_is_relative_to_now() {
    let now = Utc::now();
    let end = Deadline::after(Duration::minutes(30)).resolve(now).unwrap();
    assert_eq!(end, now + Duration::minutes(30));
  }

  #[test]
  fn deadline_must_be_in_the_future() {
    let now = Utc::now();
    assert!(matches!(
      Deadline::at(now - Duration::seconds(1)).resolve(now),
      Err(Error::DeadlineInPast(_))
    ));
    assert!(matches!(Deadline::after(Duration::zero()).resolve(now), Err(Error::DeadlineInPast(_))));
    assert!(matches!(Deadline::default().resolve(now), Err(Error::MissingDeadline)));
  }

  #[test]
  fn out_of_range_duration_is_invalid() {
    let now = Utc::now();
    for secs in [100_000_000_000_000_000, u64::MAX, 300_000 * 365 * 86_400] {
      let deadline = Deadline { end_at: None, duration_secs: Some(secs) };
      assert!(matches!(deadline.resolve(now), Err(Error::InvalidSettings(_))), "{secs}");
    }
  }

  #[test]
  fn settings_reject_zero_winners_and_zero_target() {
    assert!(settings(0).validate().is_err());
    let mut s = settings(1);
    s.target_referrals = Some(0);
    assert!(s.validate().is_err());
    s.target_referrals = None;
    assert!(s.validate().is_ok());
  }

  #[test]
  fn winners_exclude_zero_counts_and_truncate() {
    let t = Utc::now();
    let winners = select_winners(
      vec![standing(4, 0, t), standing(3, 1, t), standing(1, 3, t)],
      2,
    );
    let ids: Vec<_> = winners.iter().map(|s| s.user_id).collect();
    assert_eq!(ids, [1, 3]);
  }

  #[test]
  fn equal_counts_go_to_whoever_reached_first() {
    let t = Utc::now();
    let winners = select_winners(
      vec![
        standing(10, 2, t + Duration::seconds(5)),
        standing(20, 2, t + Duration::seconds(1)),
        standing(30, 2, t + Duration::seconds(1)),
      ],
      3,
    );
    let ids: Vec<_> = winners.iter().map(|s| s.user_id).collect();
    assert_eq!(ids, [20, 30, 10]);
  }

  #[test]
  fn unbounded_progress_has_no_target_comparison() {
    let now = Utc::now();
    let mut g = Giveaway::new(-1, 7, settings(1), now, now + Duration::hours(1));
    g.participants.insert(42, 5);
    let p = g.progress(42);
    assert_eq!(p.count, 5);
    assert_eq!(p.target, None);
    assert_eq!(p.remaining(), None);
    assert_eq!(p.reached(), None);
  }

  #[test]
  fn bounded_progress_reports_remaining() {
    let now = Utc::now();
    let mut s = settings(1);
    s.target_referrals = Some(5);
    let mut g = Giveaway::new(-1, 7, s, now, now + Duration::hours(1));
    g.participants.insert(42, 3);
    assert_eq!(g.progress(42).remaining(), Some(2));
    assert_eq!(g.progress(42).reached(), Some(false));
    assert_eq!(g.progress(99).count, 0);
  }

  #[test]
  fn awards_pair_winners_with_prizes() {
    let now = Utc::now();
    let mut s = settings(3);
    s.prizes = vec!["Gold".into(), "Silver".into()];
    let mut g = Giveaway::new(-1, 7, s, now, now + Duration::hours(1));
    g.winners = vec![5, 6, 8];
    g.participants.extend([(5, 4), (6, 2), (8, 1)]);
    let awards = g.awards();
    assert_eq!(awards[0].prize.as_deref(), Some("Gold"));
    assert_eq!(awards[1].count, 2);
    assert_eq!(awards[2].place, 3);
    assert_eq!(awards[2].prize, None);
  }
}
