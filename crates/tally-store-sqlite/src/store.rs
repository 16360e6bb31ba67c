//! [`SqliteStore`]: the SQLite implementation of [`ReferralStore`].
//!
//! Every operation runs inside a single `tokio_rusqlite` call, and the
//! conditional writes (valid-triple insert, active-slot claim, settlement)
//! run inside a transaction, so they are atomic with respect to each other.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension as _};
use uuid::Uuid;

use tally_core::{
  giveaway::{select_winners, Giveaway, Standing},
  identity::{Group, GroupSettings, NewGroup, NewUser, User},
  membership::MembershipRecord,
  referral::{ReferralEvent, ReferralFilter, ReferralKind},
  store::{AppendOutcome, CreateOutcome, ReferralStore, SettleOutcome, TokenClaim},
  GroupId, UserId,
};

use crate::{
  encode::{
    decode_uuid, encode_dt, encode_giveaway_settings, encode_group_settings, encode_limit,
    encode_uuid, encode_winners, RawGiveaway, RawGroup, RawMembership, RawReferral,
    RawStanding, RawUser, GIVEAWAY_COLUMNS, REFERRAL_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Row loaders ─────────────────────────────────────────────────────────────
//
// Synchronous helpers run on the connection thread; they take `&Connection`
// so they work equally on a plain connection and inside a transaction.

fn select_user(conn: &rusqlite::Connection, user_id: i64) -> rusqlite::Result<Option<RawUser>> {
  let user = conn
    .query_row(
      "SELECT user_id, first_name, username, registered_at, total_referrals, personal_token
       FROM users WHERE user_id = ?1",
      params![user_id],
      |row| {
        Ok(RawUser {
          user_id:         row.get(0)?,
          first_name:      row.get(1)?,
          username:        row.get(2)?,
          registered_at:   row.get(3)?,
          total_referrals: row.get(4)?,
          personal_token:  row.get(5)?,
          group_tokens:    Vec::new(),
        })
      },
    )
    .optional()?;

  let Some(mut user) = user else { return Ok(None) };

  let mut stmt = conn.prepare(
    "SELECT group_id, token FROM user_group_tokens WHERE user_id = ?1 ORDER BY group_id",
  )?;
  user.group_tokens = stmt
    .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(user))
}

fn select_group(conn: &rusqlite::Connection, group_id: i64) -> rusqlite::Result<Option<RawGroup>> {
  conn
    .query_row(
      "SELECT group_id, title, settings, registered_at, active_giveaway_id
       FROM groups WHERE group_id = ?1",
      params![group_id],
      |row| {
        Ok(RawGroup {
          group_id:           row.get(0)?,
          title:              row.get(1)?,
          settings:           row.get(2)?,
          registered_at:      row.get(3)?,
          active_giveaway_id: row.get(4)?,
        })
      },
    )
    .optional()
}

fn select_membership(
  conn: &rusqlite::Connection,
  user_id: i64,
  group_id: i64,
) -> rusqlite::Result<Option<RawMembership>> {
  conn
    .query_row(
      "SELECT user_id, group_id, first_joined_at
       FROM memberships WHERE user_id = ?1 AND group_id = ?2",
      params![user_id, group_id],
      |row| {
        Ok(RawMembership {
          user_id:         row.get(0)?,
          group_id:        row.get(1)?,
          first_joined_at: row.get(2)?,
        })
      },
    )
    .optional()
}

fn load_participants(
  conn: &rusqlite::Connection,
  raw: &mut RawGiveaway,
) -> rusqlite::Result<()> {
  let mut stmt = conn.prepare(
    "SELECT user_id, referrals FROM giveaway_participants
     WHERE giveaway_id = ?1 ORDER BY user_id",
  )?;
  raw.participants = stmt
    .query_map(params![raw.giveaway_id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(())
}

fn select_giveaway(
  conn: &rusqlite::Connection,
  giveaway_id: &str,
) -> rusqlite::Result<Option<RawGiveaway>> {
  let raw = conn
    .query_row(
      &format!("SELECT {GIVEAWAY_COLUMNS} FROM giveaways WHERE giveaway_id = ?1"),
      params![giveaway_id],
      RawGiveaway::from_row,
    )
    .optional()?;

  let Some(mut raw) = raw else { return Ok(None) };
  load_participants(conn, &mut raw)?;
  Ok(Some(raw))
}

/// Encoded filter for [`select_standings`]; `None` fields do not constrain.
struct StandingsQuery {
  referrer: Option<UserId>,
  referred: Option<UserId>,
  group:    Option<GroupId>,
  kind:     Option<String>,
  since:    Option<String>,
  until:    Option<String>,
  limit:    i64,
}

fn select_standings(
  conn: &rusqlite::Connection,
  query: &StandingsQuery,
) -> rusqlite::Result<Vec<RawStanding>> {
  // The ORDER BY mirrors `compare_standings`: count desc, then whoever
  // reached that count first, then the lower id.
  let mut stmt = conn.prepare(
    "SELECT referrer_id, COUNT(*) AS referrals, MAX(recorded_at) AS reached_at
     FROM referral_events
     WHERE valid = 1
       AND (?1 IS NULL OR referrer_id = ?1)
       AND (?2 IS NULL OR referred_id = ?2)
       AND (?3 IS NULL OR group_id = ?3)
       AND (?4 IS NULL OR kind = ?4)
       AND (?5 IS NULL OR recorded_at >= ?5)
       AND (?6 IS NULL OR recorded_at <= ?6)
     GROUP BY referrer_id
     ORDER BY referrals DESC, reached_at ASC, referrer_id ASC
     LIMIT ?7",
  )?;
  let rows = stmt
    .query_map(
      params![
        query.referrer,
        query.referred,
        query.group,
        query.kind,
        query.since,
        query.until,
        query.limit
      ],
      |row| {
        Ok(RawStanding {
          user_id:    row.get(0)?,
          count:      row.get(1)?,
          reached_at: row.get(2)?,
        })
      },
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Carry a decode failure out of a connection closure.
fn decode_failure(e: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

/// Outcome of the slot claim inside `create_giveaway`, decoded afterwards.
enum Claim {
  Created,
  Busy(String),
  MissingGroup,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store: useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn load_user(&self, user_id: UserId) -> Result<Option<User>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_user(conn, user_id)?))
      .await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn load_group(&self, group_id: GroupId) -> Result<Option<Group>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_group(conn, group_id)?))
      .await?;
    raw.map(RawGroup::into_group).transpose()
  }

  async fn load_giveaway(&self, giveaway_id: Uuid) -> Result<Option<Giveaway>> {
    let id_str = encode_uuid(giveaway_id);
    let raw = self
      .conn
      .call(move |conn| Ok(select_giveaway(conn, &id_str)?))
      .await?;
    raw.map(RawGiveaway::into_giveaway).transpose()
  }
}

// ─── ReferralStore impl ──────────────────────────────────────────────────────

impl ReferralStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn upsert_user(&self, input: NewUser) -> Result<User> {
    let at_str = encode_dt(tally_core::now());

    let raw: RawUser = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, first_name, username, registered_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (user_id) DO NOTHING",
          params![input.user_id, input.first_name, input.username, at_str],
        )?;
        Ok(select_user(conn, input.user_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
      })
      .await?;

    raw.into_user()
  }

  async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
    self.load_user(user_id).await
  }

  async fn claim_personal_token(
    &self,
    user_id:   UserId,
    candidate: String,
  ) -> Result<Option<String>> {
    let token = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE users SET personal_token = ?2
           WHERE user_id = ?1 AND personal_token IS NULL",
          params![user_id, candidate],
        )?;
        let stored: Option<Option<String>> = conn
          .query_row(
            "SELECT personal_token FROM users WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
          )
          .optional()?;
        Ok(stored.flatten())
      })
      .await?;
    Ok(token)
  }

  async fn claim_group_token(
    &self,
    user_id:   UserId,
    group_id:  GroupId,
    candidate: String,
  ) -> Result<TokenClaim> {
    let at_str = encode_dt(tally_core::now());

    let claim = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row("SELECT 1 FROM users WHERE user_id = ?1", params![user_id], |_| Ok(()))
          .optional()?
          .is_some();
        if !exists {
          return Ok(TokenClaim::UnknownUser);
        }
        let stored: Option<String> = tx
          .query_row(
            "SELECT token FROM user_group_tokens WHERE user_id = ?1 AND group_id = ?2",
            params![user_id, group_id],
            |r| r.get(0),
          )
          .optional()?;
        if let Some(stored) = stored {
          return Ok(TokenClaim::Stored(stored));
        }
        let taken = tx
          .query_row(
            "SELECT 1 FROM user_group_tokens WHERE token = ?1",
            params![candidate],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if taken {
          return Ok(TokenClaim::Taken);
        }
        tx.execute(
          "INSERT INTO user_group_tokens (user_id, group_id, token, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          params![user_id, group_id, candidate, at_str],
        )?;
        tx.commit()?;
        Ok(TokenClaim::Stored(candidate))
      })
      .await?;
    Ok(claim)
  }

  async fn find_personal_token(&self, token: &str) -> Result<Option<UserId>> {
    let token = token.to_owned();
    let user_id = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT user_id FROM users WHERE personal_token = ?1",
            params![token],
            |r| r.get(0),
          )
          .optional()?)
      })
      .await?;
    Ok(user_id)
  }

  async fn find_group_token(&self, token: &str) -> Result<Option<(UserId, GroupId)>> {
    let token = token.to_owned();
    let owner = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT user_id, group_id FROM user_group_tokens WHERE token = ?1",
            params![token],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?)
      })
      .await?;
    Ok(owner)
  }

  // ── Groups ────────────────────────────────────────────────────────────────

  async fn upsert_group(&self, input: NewGroup) -> Result<Group> {
    let at_str       = encode_dt(tally_core::now());
    let settings_str = encode_group_settings(&GroupSettings::default())?;

    let raw: RawGroup = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO groups (group_id, title, settings, registered_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (group_id) DO NOTHING",
          params![input.group_id, input.title, settings_str, at_str],
        )?;
        Ok(select_group(conn, input.group_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
      })
      .await?;

    raw.into_group()
  }

  async fn get_group(&self, group_id: GroupId) -> Result<Option<Group>> {
    self.load_group(group_id).await
  }

  async fn update_group_settings(
    &self,
    group_id: GroupId,
    settings: GroupSettings,
  ) -> Result<Option<Group>> {
    let settings_str = encode_group_settings(&settings)?;

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE groups SET settings = ?2 WHERE group_id = ?1",
          params![group_id, settings_str],
        )?;
        Ok(select_group(conn, group_id)?)
      })
      .await?;

    raw.map(RawGroup::into_group).transpose()
  }

  // ── Membership ────────────────────────────────────────────────────────────

  async fn record_first_join(&self, record: MembershipRecord) -> Result<MembershipRecord> {
    let at_str = encode_dt(record.first_joined_at);

    let raw: RawMembership = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO memberships (user_id, group_id, first_joined_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (user_id, group_id) DO NOTHING",
          params![record.user_id, record.group_id, at_str],
        )?;
        Ok(
          select_membership(conn, record.user_id, record.group_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?,
        )
      })
      .await?;

    raw.into_record()
  }

  async fn get_membership(
    &self,
    user_id:  UserId,
    group_id: GroupId,
  ) -> Result<Option<MembershipRecord>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_membership(conn, user_id, group_id)?))
      .await?;
    raw.map(RawMembership::into_record).transpose()
  }

  // ── Ledger ────────────────────────────────────────────────────────────────

  async fn append_referral(&self, event: ReferralEvent) -> Result<AppendOutcome> {
    let id_str     = encode_uuid(event.event_id);
    let at_str     = encode_dt(event.recorded_at);
    let reason_str = event.reason.map(|r| r.as_ref().to_owned());
    let kind_str   = event.kind.as_ref().to_owned();
    let referrer   = event.referrer_id;
    let referred   = event.referred_id;
    let group      = event.group_id;
    let valid      = event.valid;

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        // Valid rows conflict on `referral_events_valid_triple`; DO NOTHING
        // turns the losing insert into a no-op instead of an error.
        let n = tx.execute(
          "INSERT INTO referral_events (
             event_id, referrer_id, referred_id, group_id,
             recorded_at, valid, reason, kind
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT DO NOTHING",
          params![id_str, referrer, referred, group, at_str, valid, reason_str, kind_str],
        )?;
        if n == 1 && valid {
          tx.execute(
            "INSERT INTO users (user_id, registered_at) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO NOTHING",
            params![referrer, at_str],
          )?;
          tx.execute(
            "UPDATE users SET total_referrals = total_referrals + 1 WHERE user_id = ?1",
            params![referrer],
          )?;
        }
        tx.commit()?;
        Ok(n == 1)
      })
      .await?;

    Ok(if inserted { AppendOutcome::Appended(event) } else { AppendOutcome::Duplicate })
  }

  async fn find_valid_referral(
    &self,
    referrer_id: UserId,
    referred_id: UserId,
    group_id:    Option<GroupId>,
  ) -> Result<Option<ReferralEvent>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {REFERRAL_COLUMNS} FROM referral_events
               WHERE valid = 1
                 AND referrer_id = ?1
                 AND referred_id = ?2
                 AND COALESCE(group_id, 0) = COALESCE(?3, 0)"
            ),
            params![referrer_id, referred_id, group_id],
            RawReferral::from_row,
          )
          .optional()?)
      })
      .await?;
    raw.map(RawReferral::into_event).transpose()
  }

  async fn latest_pending(
    &self,
    referred_id: UserId,
    group_id:    GroupId,
  ) -> Result<Option<ReferralEvent>> {
    let kind_str = ReferralKind::Pending.as_ref().to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {REFERRAL_COLUMNS} FROM referral_events
               WHERE kind = ?1 AND referred_id = ?2 AND group_id = ?3
               ORDER BY recorded_at DESC, rowid DESC
               LIMIT 1"
            ),
            params![kind_str, referred_id, group_id],
            RawReferral::from_row,
          )
          .optional()?)
      })
      .await?;
    raw.map(RawReferral::into_event).transpose()
  }

  async fn list_referrals(&self, filter: &ReferralFilter) -> Result<Vec<ReferralEvent>> {
    let referrer   = filter.referrer_id;
    let referred   = filter.referred_id;
    let group      = filter.group_id;
    let kind_str   = filter.kind.map(|k| k.as_ref().to_owned());
    let valid_only = filter.valid_only;
    let since_str  = filter.since.map(encode_dt);
    let until_str  = filter.until.map(encode_dt);
    let limit_val  = encode_limit(filter.limit);

    let raws: Vec<RawReferral> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REFERRAL_COLUMNS} FROM referral_events
           WHERE (?1 IS NULL OR referrer_id = ?1)
             AND (?2 IS NULL OR referred_id = ?2)
             AND (?3 IS NULL OR group_id = ?3)
             AND (?4 IS NULL OR kind = ?4)
             AND (?5 = 0 OR valid = 1)
             AND (?6 IS NULL OR recorded_at >= ?6)
             AND (?7 IS NULL OR recorded_at <= ?7)
           ORDER BY recorded_at, rowid
           LIMIT ?8"
        ))?;
        let rows = stmt
          .query_map(
            params![referrer, referred, group, kind_str, valid_only, since_str, until_str, limit_val],
            RawReferral::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawReferral::into_event).collect()
  }

  async fn count_by_referrer(&self, filter: &ReferralFilter) -> Result<Vec<Standing>> {
    let query = StandingsQuery {
      referrer: filter.referrer_id,
      referred: filter.referred_id,
      group:    filter.group_id,
      kind:     filter.kind.map(|k| k.as_ref().to_owned()),
      since:    filter.since.map(encode_dt),
      until:    filter.until.map(encode_dt),
      limit:    encode_limit(filter.limit),
    };

    let raws = self
      .conn
      .call(move |conn| Ok(select_standings(conn, &query)?))
      .await?;

    raws.into_iter().map(RawStanding::into_standing).collect()
  }

  // ── Giveaways ─────────────────────────────────────────────────────────────

  async fn create_giveaway(&self, giveaway: Giveaway) -> Result<CreateOutcome> {
    let id_str       = encode_uuid(giveaway.giveaway_id);
    let group_id     = giveaway.group_id;
    let creator_id   = giveaway.creator_id;
    let settings_str = encode_giveaway_settings(&giveaway.settings)?;
    let started_str  = encode_dt(giveaway.started_at);
    let end_str      = encode_dt(giveaway.end_at);

    let claim = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let claimed = tx.execute(
          "UPDATE groups SET active_giveaway_id = ?1
           WHERE group_id = ?2 AND active_giveaway_id IS NULL",
          params![id_str, group_id],
        )?;
        if claimed == 0 {
          let active: Option<Option<String>> = tx
            .query_row(
              "SELECT active_giveaway_id FROM groups WHERE group_id = ?1",
              params![group_id],
              |r| r.get(0),
            )
            .optional()?;
          return Ok(match active {
            None => Claim::MissingGroup,
            Some(active) => Claim::Busy(active.unwrap_or_default()),
          });
        }
        tx.execute(
          "INSERT INTO giveaways (
             giveaway_id, group_id, creator_id, settings, started_at, end_at, active
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
          params![id_str, group_id, creator_id, settings_str, started_str, end_str],
        )?;
        tx.commit()?;
        Ok(Claim::Created)
      })
      .await?;

    match claim {
      Claim::Created => Ok(CreateOutcome::Created(giveaway)),
      Claim::Busy(active) => Ok(CreateOutcome::GroupBusy(decode_uuid(&active)?)),
      Claim::MissingGroup => Err(Error::GroupNotFound(group_id)),
    }
  }

  async fn get_giveaway(&self, giveaway_id: Uuid) -> Result<Option<Giveaway>> {
    self.load_giveaway(giveaway_id).await
  }

  async fn list_active_giveaways(&self) -> Result<Vec<Giveaway>> {
    let raws: Vec<RawGiveaway> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {GIVEAWAY_COLUMNS} FROM giveaways WHERE active = 1 ORDER BY end_at"
        ))?;
        let mut rows = stmt
          .query_map([], RawGiveaway::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        for raw in &mut rows {
          load_participants(conn, raw)?;
        }
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGiveaway::into_giveaway).collect()
  }

  async fn record_progress(&self, giveaway_id: Uuid, user_id: UserId, count: u32) -> Result<bool> {
    let id_str = encode_uuid(giveaway_id);

    let n = self
      .conn
      .call(move |conn| {
        // The SELECT's WHERE clause both gates on `active` and resolves the
        // INSERT … SELECT … ON CONFLICT parsing ambiguity.
        Ok(conn.execute(
          "INSERT INTO giveaway_participants (giveaway_id, user_id, referrals)
           SELECT ?1, ?2, ?3
           WHERE EXISTS (SELECT 1 FROM giveaways WHERE giveaway_id = ?1 AND active = 1)
           ON CONFLICT (giveaway_id, user_id)
           DO UPDATE SET referrals = MAX(referrals, excluded.referrals)",
          params![id_str, user_id, count],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn settle_giveaway(
    &self,
    giveaway_id: Uuid,
    ended_at:    DateTime<Utc>,
  ) -> Result<SettleOutcome> {
    let id_str = encode_uuid(giveaway_id);

    let (settled, raw) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(current) = select_giveaway(&tx, &id_str)? else {
          return Ok((false, None));
        };
        if !current.active {
          return Ok((false, Some(current)));
        }

        // Ranked in the same transaction as the write, over
        // `[started_at, min(ended_at, end_at)]`.
        let giveaway = current.into_giveaway().map_err(decode_failure)?;
        let query = StandingsQuery {
          referrer: None,
          referred: None,
          group:    Some(giveaway.group_id),
          kind:     None,
          since:    Some(encode_dt(giveaway.started_at)),
          until:    Some(encode_dt(giveaway.window_end(ended_at))),
          limit:    -1,
        };
        let standings = select_standings(&tx, &query)?
          .into_iter()
          .map(RawStanding::into_standing)
          .collect::<Result<Vec<Standing>>>()
          .map_err(decode_failure)?;
        let winners: Vec<UserId> =
          select_winners(standings.clone(), giveaway.settings.max_winners)
            .into_iter()
            .map(|w| w.user_id)
            .collect();
        let winners_str = encode_winners(&winners).map_err(decode_failure)?;

        let n = tx.execute(
          "UPDATE giveaways SET active = 0, ended_at = ?2, winners = ?3
           WHERE giveaway_id = ?1 AND active = 1",
          params![id_str, encode_dt(ended_at), winners_str],
        )?;
        if n == 1 {
          tx.execute(
            "UPDATE groups SET active_giveaway_id = NULL WHERE active_giveaway_id = ?1",
            params![id_str],
          )?;
          tx.execute(
            "DELETE FROM giveaway_participants WHERE giveaway_id = ?1",
            params![id_str],
          )?;
          let mut stmt = tx.prepare(
            "INSERT INTO giveaway_participants (giveaway_id, user_id, referrals)
             VALUES (?1, ?2, ?3)",
          )?;
          for standing in &standings {
            stmt.execute(params![id_str, standing.user_id, standing.count])?;
          }
          drop(stmt);
        }
        let raw = select_giveaway(&tx, &id_str)?;
        tx.commit()?;
        Ok((n == 1, raw))
      })
      .await?;

    let giveaway = raw
      .ok_or(Error::GiveawayNotFound(giveaway_id))?
      .into_giveaway()?;

    Ok(if settled {
      SettleOutcome::Settled(giveaway)
    } else {
      SettleOutcome::AlreadyEnded(giveaway)
    })
  }
}
