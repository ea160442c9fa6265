//! SQL schema for the Kindred SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
-- Wait for a concurrent writer instead of failing with SQLITE_BUSY; job
-- claiming relies on BEGIN IMMEDIATE blocking until the lock frees up.
PRAGMA busy_timeout = 5000;

-- Matching configurations are immutable once created.
CREATE TABLE IF NOT EXISTS configs (
    config_id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    created                   TEXT NOT NULL,
    linkage_rules             TEXT NOT NULL,   -- opaque JSON for the engine
    potential_match_threshold REAL NOT NULL,
    auto_match_threshold      REAL NOT NULL,
    CHECK (auto_match_threshold >= potential_match_threshold)
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    created    TEXT NOT NULL,
    updated    TEXT NOT NULL,
    kind       TEXT NOT NULL,   -- 'import-person-records' | 'export-potential-matches'
    status     TEXT NOT NULL,   -- 'new' | 'running' | 'succeeded' | 'failed'
    config_id  INTEGER NOT NULL REFERENCES configs(config_id),
    source_uri TEXT NOT NULL,
    reason     TEXT             -- failure reason; NULL unless status = 'failed'
);

-- Records are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS person_records (
    record_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    created                TEXT NOT NULL,
    job_id                 INTEGER NOT NULL REFERENCES jobs(job_id),
    fingerprint            TEXT NOT NULL UNIQUE,  -- sha256 of demographics
    data_source            TEXT NOT NULL,
    source_person_id       TEXT NOT NULL,
    first_name             TEXT NOT NULL,
    last_name              TEXT NOT NULL,
    sex                    TEXT NOT NULL,
    race                   TEXT NOT NULL,
    birth_date             TEXT NOT NULL,
    death_date             TEXT NOT NULL,
    social_security_number TEXT NOT NULL,
    address                TEXT NOT NULL,
    city                   TEXT NOT NULL,
    state                  TEXT NOT NULL,
    zip_code               TEXT NOT NULL,
    county                 TEXT NOT NULL,
    phone                  TEXT NOT NULL
);

-- Person rows are never deleted; an emptied person keeps its row with a
-- 'deleted' timestamp so audit references stay resolvable.
CREATE TABLE IF NOT EXISTS persons (
    person_id    TEXT PRIMARY KEY,
    created      TEXT NOT NULL,
    updated      TEXT NOT NULL,
    version      INTEGER NOT NULL,
    record_count INTEGER NOT NULL,
    job_id       INTEGER REFERENCES jobs(job_id),
    deleted      TEXT,
    CHECK (record_count >= 0)
);

-- The only mutable link between records and persons.
CREATE TABLE IF NOT EXISTS person_crosswalk (
    record_id INTEGER PRIMARY KEY REFERENCES person_records(record_id),
    person_id TEXT NOT NULL REFERENCES persons(person_id)
);

CREATE TABLE IF NOT EXISTS match_groups (
    group_id TEXT PRIMARY KEY,
    created  TEXT NOT NULL,
    updated  TEXT NOT NULL,
    job_id   INTEGER NOT NULL REFERENCES jobs(job_id),
    version  INTEGER NOT NULL,
    matched  TEXT,   -- merged (auto or approved)
    deleted  TEXT    -- rejected or superseded by a later run
);

-- Record ids are normalized left < right so an unordered pair appears at
-- most once per group.
CREATE TABLE IF NOT EXISTS pair_scores (
    score_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    created         TEXT NOT NULL,
    group_id        TEXT NOT NULL REFERENCES match_groups(group_id),
    job_id          INTEGER NOT NULL REFERENCES jobs(job_id),
    left_record_id  INTEGER NOT NULL REFERENCES person_records(record_id),
    right_record_id INTEGER NOT NULL REFERENCES person_records(record_id),
    probability     REAL NOT NULL,
    match_weight    REAL NOT NULL,
    UNIQUE (group_id, left_record_id, right_record_id),
    CHECK  (left_record_id < right_record_id)
);

-- The audit trail. All three tables are append-only.
CREATE TABLE IF NOT EXISTS match_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    created  TEXT NOT NULL,
    job_id   INTEGER REFERENCES jobs(job_id),
    kind     TEXT NOT NULL   -- 'new-identities' | 'auto-matches' | 'manual-match' | 'manual-reject'
);

CREATE TABLE IF NOT EXISTS match_group_actions (
    action_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id  INTEGER NOT NULL REFERENCES match_events(event_id),
    group_id  TEXT NOT NULL REFERENCES match_groups(group_id),
    score_id  INTEGER REFERENCES pair_scores(score_id),
    kind      TEXT NOT NULL,  -- 'add-score' | 'remove-score' | 'match' | 'reject'
    user_id   INTEGER REFERENCES users(user_id)  -- NULL means the system
);

CREATE TABLE IF NOT EXISTS person_actions (
    action_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id  INTEGER NOT NULL REFERENCES match_events(event_id),
    group_id  TEXT REFERENCES match_groups(group_id),
    person_id TEXT NOT NULL REFERENCES persons(person_id),
    record_id INTEGER NOT NULL REFERENCES person_records(record_id),
    kind      TEXT NOT NULL,  -- 'add-record' | 'remove-record' | 'review'
    user_id   INTEGER REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    created     TEXT NOT NULL,
    idp_user_id TEXT NOT NULL UNIQUE,
    role        TEXT NOT NULL   -- 'admin' | 'member'
);

CREATE INDEX IF NOT EXISTS jobs_status_idx          ON jobs(status);
CREATE INDEX IF NOT EXISTS crosswalk_person_idx     ON person_crosswalk(person_id);
CREATE INDEX IF NOT EXISTS match_groups_pending_idx ON match_groups(job_id)
    WHERE matched IS NULL AND deleted IS NULL;
CREATE INDEX IF NOT EXISTS pair_scores_group_idx    ON pair_scores(group_id);
CREATE INDEX IF NOT EXISTS person_actions_person_idx ON person_actions(person_id);

PRAGMA user_version = 1;
";
