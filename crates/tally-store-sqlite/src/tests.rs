//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Duration;
use tally_core::{
  giveaway::{Giveaway, GiveawaySettings},
  identity::{GroupSettings, NewGroup, NewUser},
  membership::MembershipRecord,
  referral::{NewReferral, ReferralEvent, ReferralFilter, ReferralKind, RejectReason},
  store::{AppendOutcome, CreateOutcome, ReferralStore, SettleOutcome, TokenClaim},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

const GROUP: i64 = -1001;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn store_with_group() -> SqliteStore {
  let s = store().await;
  s.upsert_group(NewGroup { group_id: GROUP, title: "Rustaceans".into() })
    .await
    .unwrap();
  s
}

fn giveaway(group_id: i64, max_winners: u32) -> Giveaway {
  let now = tally_core::now();
  Giveaway::new(
    group_id,
    1,
    GiveawaySettings { target_referrals: None, max_winners, prizes: vec![] },
    now,
    now + Duration::hours(1),
  )
}

async fn accept(s: &SqliteStore, referrer: i64, referred: i64, group: Option<i64>) -> AppendOutcome {
  let event = ReferralEvent::accepted(NewReferral::new(referrer, referred, group), tally_core::now());
  s.append_referral(event).await.unwrap()
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_user_is_idempotent() {
  let s = store().await;

  let first = s
    .upsert_user(NewUser { user_id: 7, first_name: Some("Alice".into()), username: None })
    .await
    .unwrap();
  let again = s
    .upsert_user(NewUser { user_id: 7, first_name: Some("Mallory".into()), username: Some("m".into()) })
    .await
    .unwrap();

  assert_eq!(first, again);
  assert_eq!(again.first_name.as_deref(), Some("Alice"));
  assert_eq!(again.total_referrals, 0);
}

#[tokio::test]
async fn get_user_missing_returns_none() {
  let s = store().await;
  assert!(s.get_user(404).await.unwrap().is_none());
}

#[tokio::test]
async fn personal_token_is_set_once() {
  let s = store().await;
  s.upsert_user(NewUser::bare(7)).await.unwrap();

  let first  = s.claim_personal_token(7, "aaa".into()).await.unwrap();
  let second = s.claim_personal_token(7, "bbb".into()).await.unwrap();

  assert_eq!(first.as_deref(), Some("aaa"));
  assert_eq!(second.as_deref(), Some("aaa"));
  assert_eq!(s.find_personal_token("aaa").await.unwrap(), Some(7));
  assert_eq!(s.find_personal_token("bbb").await.unwrap(), None);
}

#[tokio::test]
async fn personal_token_for_missing_user_is_none() {
  let s = store().await;
  assert_eq!(s.claim_personal_token(9, "x".into()).await.unwrap(), None);
}

#[tokio::test]
async fn group_tokens_are_set_once_per_group() {
  let s = store().await;
  s.upsert_user(NewUser::bare(7)).await.unwrap();

  let a = s.claim_group_token(7, GROUP, "link-a".into()).await.unwrap();
  let b = s.claim_group_token(7, GROUP, "link-b".into()).await.unwrap();
  let c = s.claim_group_token(7, -2002, "link-c".into()).await.unwrap();

  assert_eq!(a, TokenClaim::Stored("link-a".into()));
  assert_eq!(b, TokenClaim::Stored("link-a".into()));
  assert_eq!(c, TokenClaim::Stored("link-c".into()));

  let user = s.get_user(7).await.unwrap().unwrap();
  assert_eq!(user.group_tokens.len(), 2);
  assert_eq!(s.find_group_token("link-a").await.unwrap(), Some((7, GROUP)));
  assert_eq!(s.find_group_token("link-b").await.unwrap(), None);
}

#[tokio::test]
async fn group_token_held_elsewhere_is_taken() {
  let s = store().await;
  s.upsert_user(NewUser::bare(7)).await.unwrap();
  s.upsert_user(NewUser::bare(8)).await.unwrap();
  s.claim_group_token(7, GROUP, "link-a".into()).await.unwrap();

  let other_user = s.claim_group_token(8, GROUP, "link-a".into()).await.unwrap();
  let other_group = s.claim_group_token(7, -2002, "link-a".into()).await.unwrap();
  assert_eq!(other_user, TokenClaim::Taken);
  assert_eq!(other_group, TokenClaim::Taken);

  assert!(s.get_user(8).await.unwrap().unwrap().group_tokens.is_empty());
  assert_eq!(s.find_group_token("link-a").await.unwrap(), Some((7, GROUP)));
  assert_eq!(
    s.claim_group_token(9, GROUP, "link-z".into()).await.unwrap(),
    TokenClaim::UnknownUser
  );
}

// ─── Groups ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_group_keeps_first_record() {
  let s = store_with_group().await;
  let again = s
    .upsert_group(NewGroup { group_id: GROUP, title: "Renamed".into() })
    .await
    .unwrap();
  assert_eq!(again.title, "Rustaceans");
  assert_eq!(again.settings, GroupSettings::default());
  assert!(again.active_giveaway_id.is_none());
}

#[tokio::test]
async fn update_group_settings_roundtrip() {
  let s = store_with_group().await;
  let settings = GroupSettings { welcome_template: Some("Hi {name}".into()), leaderboard_size: 3 };

  let updated = s.update_group_settings(GROUP, settings.clone()).await.unwrap().unwrap();
  assert_eq!(updated.settings, settings);
  assert!(s.update_group_settings(-9, settings).await.unwrap().is_none());
}

// ─── Membership ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_join_is_never_overwritten() {
  let s = store().await;
  let t0 = tally_core::now() - Duration::days(2);

  let first = s
    .record_first_join(MembershipRecord { user_id: 5, group_id: GROUP, first_joined_at: t0 })
    .await
    .unwrap();
  let rejoin = s
    .record_first_join(MembershipRecord {
      user_id:         5,
      group_id:        GROUP,
      first_joined_at: tally_core::now(),
    })
    .await
    .unwrap();

  assert_eq!(first.first_joined_at, t0);
  assert_eq!(rejoin.first_joined_at, t0);
  assert_eq!(s.get_membership(5, GROUP).await.unwrap(), Some(first));
  assert!(s.get_membership(5, -7).await.unwrap().is_none());
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_triple_is_unique_and_counter_follows() {
  let s = store().await;

  assert!(matches!(accept(&s, 1, 2, Some(GROUP)).await, AppendOutcome::Appended(_)));
  assert_eq!(accept(&s, 1, 2, Some(GROUP)).await, AppendOutcome::Duplicate);
  // A different group is a different triple.
  assert!(matches!(accept(&s, 1, 2, Some(-2002)).await, AppendOutcome::Appended(_)));

  let referrer = s.get_user(1).await.unwrap().expect("referrer row created");
  assert_eq!(referrer.total_referrals, 2);
}

#[tokio::test]
async fn direct_referrals_without_group_are_unique_too() {
  let s = store().await;
  assert!(matches!(accept(&s, 1, 2, None).await, AppendOutcome::Appended(_)));
  assert_eq!(accept(&s, 1, 2, None).await, AppendOutcome::Duplicate);
  assert!(s.find_valid_referral(1, 2, None).await.unwrap().is_some());
  assert!(s.find_valid_referral(1, 2, Some(GROUP)).await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_events_are_kept_and_do_not_count() {
  let s = store().await;
  let input = NewReferral::new(1, 2, Some(GROUP));

  for _ in 0..2 {
    let event = ReferralEvent::rejected(input, RejectReason::PreviouslyJoined, tally_core::now());
    assert!(matches!(s.append_referral(event).await.unwrap(), AppendOutcome::Appended(_)));
  }

  let all = s.list_referrals(&ReferralFilter::default()).await.unwrap();
  assert_eq!(all.len(), 2);
  assert!(all.iter().all(|e| !e.valid && e.reason == Some(RejectReason::PreviouslyJoined)));
  assert!(s.list_referrals(&ReferralFilter::valid()).await.unwrap().is_empty());
  assert!(s.get_user(1).await.unwrap().is_none());
}

#[tokio::test]
async fn referral_event_roundtrip() {
  let s = store().await;
  let event = ReferralEvent::accepted(NewReferral::new(3, 4, Some(GROUP)), tally_core::now());
  s.append_referral(event.clone()).await.unwrap();

  let stored = s.find_valid_referral(3, 4, Some(GROUP)).await.unwrap().unwrap();
  assert_eq!(stored, event);
}

#[tokio::test]
async fn latest_pending_returns_most_recent_intent() {
  let s = store().await;
  let t = tally_core::now();
  s.append_referral(ReferralEvent::pending(10, 2, GROUP, t - Duration::minutes(5))).await.unwrap();
  s.append_referral(ReferralEvent::pending(11, 2, GROUP, t)).await.unwrap();

  let pending = s.latest_pending(2, GROUP).await.unwrap().unwrap();
  assert_eq!(pending.referrer_id, 11);
  assert_eq!(pending.kind, ReferralKind::Pending);
  assert!(s.latest_pending(2, -5).await.unwrap().is_none());
}

#[tokio::test]
async fn count_by_referrer_orders_by_count_then_reached_at() {
  let s = store().await;
  let t = tally_core::now() - Duration::minutes(10);
  let at = |mins: i64| t + Duration::minutes(mins);

  // 20 reaches two referrals at +2, 10 reaches two at +3, 30 has one.
  for (referrer, referred, mins) in [(10, 1, 0), (20, 2, 1), (20, 3, 2), (10, 4, 3), (30, 5, 4)] {
    let event = ReferralEvent::accepted(NewReferral::new(referrer, referred, Some(GROUP)), at(mins));
    s.append_referral(event).await.unwrap();
  }
  // Outside the group.
  accept(&s, 30, 6, None).await;

  let standings = s
    .count_by_referrer(&ReferralFilter::valid().in_group(GROUP))
    .await
    .unwrap();
  let ids: Vec<_> = standings.iter().map(|r| (r.user_id, r.count)).collect();
  assert_eq!(ids, [(20, 2), (10, 2), (30, 1)]);
  assert_eq!(standings[0].reached_at, at(2));

  let windowed = s
    .count_by_referrer(&ReferralFilter::valid().in_group(GROUP).between(at(2), at(4)).limit(2))
    .await
    .unwrap();
  let ids: Vec<_> = windowed.iter().map(|r| (r.user_id, r.count)).collect();
  assert_eq!(ids, [(20, 1), (10, 1)]);

  let global = s.count_by_referrer(&ReferralFilter::valid()).await.unwrap();
  assert_eq!(global.iter().find(|r| r.user_id == 30).unwrap().count, 2);
}

// ─── Giveaways ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_giveaway_claims_group_slot() {
  let s = store_with_group().await;
  let g = giveaway(GROUP, 1);

  let CreateOutcome::Created(created) = s.create_giveaway(g.clone()).await.unwrap() else {
    panic!("expected Created");
  };
  assert_eq!(created, g);

  let group = s.get_group(GROUP).await.unwrap().unwrap();
  assert_eq!(group.active_giveaway_id, Some(g.giveaway_id));

  let second = s.create_giveaway(giveaway(GROUP, 1)).await.unwrap();
  assert_eq!(second, CreateOutcome::GroupBusy(g.giveaway_id));

  let stored = s.get_giveaway(g.giveaway_id).await.unwrap().unwrap();
  assert_eq!(stored, g);
}

#[tokio::test]
async fn create_giveaway_requires_registered_group() {
  let s = store().await;
  let result = s.create_giveaway(giveaway(-5, 1)).await;
  assert!(matches!(result, Err(Error::GroupNotFound(-5))));
}

#[tokio::test]
async fn record_progress_never_lowers_a_count() {
  let s = store_with_group().await;
  let g = giveaway(GROUP, 1);
  s.create_giveaway(g.clone()).await.unwrap();

  assert!(s.record_progress(g.giveaway_id, 7, 3).await.unwrap());
  assert!(s.record_progress(g.giveaway_id, 7, 2).await.unwrap());

  let stored = s.get_giveaway(g.giveaway_id).await.unwrap().unwrap();
  assert_eq!(stored.participants.get(&7), Some(&3));
}

#[tokio::test]
async fn settle_is_compare_and_set() {
  let s = store_with_group().await;
  let g = giveaway(GROUP, 2);
  s.create_giveaway(g.clone()).await.unwrap();

  accept(&s, 1, 10, Some(GROUP)).await;
  accept(&s, 1, 11, Some(GROUP)).await;
  accept(&s, 1, 12, Some(GROUP)).await;
  accept(&s, 3, 13, Some(GROUP)).await;
  accept(&s, 5, 14, Some(-2002)).await;

  let t = tally_core::now();
  let first = s.settle_giveaway(g.giveaway_id, t).await.unwrap();
  let SettleOutcome::Settled(ended) = &first else { panic!("expected Settled") };
  assert!(!ended.active);
  assert_eq!(ended.winners, [1, 3]);
  assert_eq!(ended.ended_at, Some(t));
  assert_eq!(ended.participants.get(&1), Some(&3));
  assert_eq!(ended.participants.get(&3), Some(&1));
  assert_eq!(ended.participants.get(&5), None);

  // The loser of the race sees the stored result, untouched.
  accept(&s, 3, 15, Some(GROUP)).await;
  let second = s.settle_giveaway(g.giveaway_id, t + Duration::seconds(5)).await.unwrap();
  assert_eq!(second, SettleOutcome::AlreadyEnded(ended.clone()));

  // Slot is free again and progress writes are refused.
  assert!(s.get_group(GROUP).await.unwrap().unwrap().active_giveaway_id.is_none());
  assert!(!s.record_progress(g.giveaway_id, 1, 10).await.unwrap());
  assert!(s.list_active_giveaways().await.unwrap().is_empty());
  assert!(matches!(s.create_giveaway(giveaway(GROUP, 1)).await.unwrap(), CreateOutcome::Created(_)));
}

#[tokio::test]
async fn settle_ranks_events_up_to_the_end_instant() {
  let s = store_with_group().await;
  let g = giveaway(GROUP, 1);
  s.create_giveaway(g.clone()).await.unwrap();

  accept(&s, 1, 10, Some(GROUP)).await;
  let t = tally_core::now();
  // Recorded after the end instant; not counted.
  s.append_referral(ReferralEvent::accepted(
    NewReferral::new(2, 11, Some(GROUP)),
    t + Duration::seconds(1),
  ))
  .await
  .unwrap();
  s.append_referral(ReferralEvent::accepted(
    NewReferral::new(2, 12, Some(GROUP)),
    t + Duration::seconds(2),
  ))
  .await
  .unwrap();

  let SettleOutcome::Settled(ended) = s.settle_giveaway(g.giveaway_id, t).await.unwrap() else {
    panic!("expected Settled")
  };
  assert_eq!(ended.winners, [1]);
  assert_eq!(ended.participants.get(&2), None);
}

#[tokio::test]
async fn settle_missing_giveaway_is_not_found() {
  let s = store().await;
  let id = Uuid::new_v4();
  let result = s.settle_giveaway(id, tally_core::now()).await;
  assert!(matches!(result, Err(Error::GiveawayNotFound(g)) if g == id));
}
