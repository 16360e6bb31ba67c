//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id         INTEGER PRIMARY KEY,
    first_name      TEXT,
    username        TEXT,
    registered_at   TEXT NOT NULL,
    total_referrals INTEGER NOT NULL DEFAULT 0,
    personal_token  TEXT UNIQUE          -- set once, never rewritten
);

CREATE TABLE IF NOT EXISTS user_group_tokens (
    user_id    INTEGER NOT NULL REFERENCES users(user_id),
    group_id   INTEGER NOT NULL,
    token      TEXT    NOT NULL UNIQUE,
    created_at TEXT    NOT NULL,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS groups (
    group_id           INTEGER PRIMARY KEY,
    title              TEXT NOT NULL,
    settings           TEXT NOT NULL,   -- JSON GroupSettings
    registered_at      TEXT NOT NULL,
    active_giveaway_id TEXT             -- claimed with a conditional UPDATE
);

-- Written at most once per (user, group); never updated.
CREATE TABLE IF NOT EXISTS memberships (
    user_id         INTEGER NOT NULL,
    group_id        INTEGER NOT NULL,
    first_joined_at TEXT    NOT NULL,
    PRIMARY KEY (user_id, group_id)
);

-- The ledger is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS referral_events (
    event_id    TEXT PRIMARY KEY,
    referrer_id INTEGER NOT NULL,
    referred_id INTEGER NOT NULL,
    group_id    INTEGER,                -- NULL for direct referrals
    recorded_at TEXT    NOT NULL,
    valid       INTEGER NOT NULL,
    reason      TEXT,                   -- 'previously_joined' | 'duplicate' | ...
    kind        TEXT    NOT NULL,       -- 'direct' | 'group' | 'pending'
    CHECK (valid = 0 OR referrer_id != referred_id)
);

-- At most one valid event per (referrer, referred, group). Group ids are
-- never 0, so COALESCE folds direct referrals into a single key.
CREATE UNIQUE INDEX IF NOT EXISTS referral_events_valid_triple
    ON referral_events(referrer_id, referred_id, COALESCE(group_id, 0))
    WHERE valid = 1;

CREATE INDEX IF NOT EXISTS referral_events_group_idx    ON referral_events(group_id, recorded_at);
CREATE INDEX IF NOT EXISTS referral_events_referrer_idx ON referral_events(referrer_id);
CREATE INDEX IF NOT EXISTS referral_events_referred_idx ON referral_events(referred_id, group_id);

CREATE TABLE IF NOT EXISTS giveaways (
    giveaway_id TEXT PRIMARY KEY,
    group_id    INTEGER NOT NULL REFERENCES groups(group_id),
    creator_id  INTEGER NOT NULL,
    settings    TEXT    NOT NULL,       -- JSON GiveawaySettings
    started_at  TEXT    NOT NULL,
    end_at      TEXT    NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1,
    ended_at    TEXT,
    winners     TEXT    NOT NULL DEFAULT '[]'
);

CREATE UNIQUE INDEX IF NOT EXISTS giveaways_one_active_per_group
    ON giveaways(group_id)
    WHERE active = 1;

CREATE TABLE IF NOT EXISTS giveaway_participants (
    giveaway_id TEXT    NOT NULL REFERENCES giveaways(giveaway_id),
    user_id     INTEGER NOT NULL,
    referrals   INTEGER NOT NULL,
    PRIMARY KEY (giveaway_id, user_id)
);

PRAGMA user_version = 1;
";
