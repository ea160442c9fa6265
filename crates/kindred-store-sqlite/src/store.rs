//! [`SqliteStore`] — the SQLite implementation of [`MatchStore`].

use std::{
  collections::BTreeMap,
  path::Path,
};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use kindred_core::{
  Error as CoreError,
  audit::{
    Actor, MatchEvent, MatchEventKind, MatchGroupActionKind, PersonActionKind,
  },
  cluster::{self, GroupOutcome, MatchAnalysis, PersonMove, ScoredPair},
  config::{MatchConfig, NewMatchConfig},
  group::{MatchGroup, PotentialMatch},
  job::{Job, JobOutcome, JobStatus, NewJob},
  person::{CrosswalkEntry, Person},
  record::{Demographics, ImportSummary, NewPersonRecord, PersonRecord},
  store::MatchStore,
  user::{NewUser, User},
};

use crate::{
  Error, Result,
  encode::{
    RawConfig, RawJob, RawMatchGroup, RawPairScore, RawPerson,
    RawPersonRecord, RawUser, decode_job_status, encode_actor, encode_dt,
    encode_event_kind, encode_group_action_kind, encode_job_kind,
    encode_job_status, encode_person_action_kind, encode_user_role,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Kindred match store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
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

  /// Open an in-memory store — useful for testing.
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
}

// ─── Row readers ─────────────────────────────────────────────────────────────

const JOB_COLUMNS: &str =
  "job_id, created, updated, kind, status, config_id, source_uri, reason";

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
  Ok(RawJob {
    job_id:     row.get(0)?,
    created:    row.get(1)?,
    updated:    row.get(2)?,
    kind:       row.get(3)?,
    status:     row.get(4)?,
    config_id:  row.get(5)?,
    source_uri: row.get(6)?,
    reason:     row.get(7)?,
  })
}

fn select_job(
  conn: &rusqlite::Connection,
  job_id: i64,
) -> rusqlite::Result<Option<RawJob>> {
  conn
    .query_row(
      &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
      rusqlite::params![job_id],
      job_from_row,
    )
    .optional()
}

const RECORD_COLUMNS: &str = "record_id, created, job_id, fingerprint, \
   data_source, source_person_id, first_name, last_name, sex, race, \
   birth_date, death_date, social_security_number, address, city, state, \
   zip_code, county, phone";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPersonRecord> {
  Ok(RawPersonRecord {
    record_id:    row.get(0)?,
    created:      row.get(1)?,
    job_id:       row.get(2)?,
    fingerprint:  row.get(3)?,
    demographics: Demographics {
      data_source:            row.get(4)?,
      source_person_id:       row.get(5)?,
      first_name:             row.get(6)?,
      last_name:              row.get(7)?,
      sex:                    row.get(8)?,
      race:                   row.get(9)?,
      birth_date:             row.get(10)?,
      death_date:             row.get(11)?,
      social_security_number: row.get(12)?,
      address:                row.get(13)?,
      city:                   row.get(14)?,
      state:                  row.get(15)?,
      zip_code:               row.get(16)?,
      county:                 row.get(17)?,
      phone:                  row.get(18)?,
    },
  })
}

const GROUP_COLUMNS: &str =
  "group_id, created, updated, job_id, version, matched, deleted";

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMatchGroup> {
  Ok(RawMatchGroup {
    group_id: row.get(0)?,
    created:  row.get(1)?,
    updated:  row.get(2)?,
    job_id:   row.get(3)?,
    version:  row.get(4)?,
    matched:  row.get(5)?,
    deleted:  row.get(6)?,
  })
}

// ─── Audit helpers ───────────────────────────────────────────────────────────

fn insert_event(
  conn: &rusqlite::Connection,
  now: &str,
  job_id: Option<i64>,
  kind: MatchEventKind,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO match_events (created, job_id, kind) VALUES (?1, ?2, ?3)",
    rusqlite::params![now, job_id, encode_event_kind(kind)],
  )?;
  Ok(conn.last_insert_rowid())
}

fn insert_group_action(
  conn: &rusqlite::Connection,
  event_id: i64,
  group_id: &str,
  score_id: Option<i64>,
  kind: MatchGroupActionKind,
  actor: Actor,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO match_group_actions (event_id, group_id, score_id, kind, user_id)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    rusqlite::params![
      event_id,
      group_id,
      score_id,
      encode_group_action_kind(kind),
      encode_actor(actor),
    ],
  )?;
  Ok(())
}

fn insert_person_action(
  conn: &rusqlite::Connection,
  event_id: i64,
  group_id: Option<&str>,
  person_id: &str,
  record_id: i64,
  kind: PersonActionKind,
  actor: Actor,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO person_actions (event_id, group_id, person_id, record_id, kind, user_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      event_id,
      group_id,
      person_id,
      record_id,
      encode_person_action_kind(kind),
      encode_actor(actor),
    ],
  )?;
  Ok(())
}

// ─── Crosswalk helpers ───────────────────────────────────────────────────────

fn crosswalk_rows(
  conn: &rusqlite::Connection,
  record_ids: &[i64],
) -> Result<Vec<CrosswalkEntry>> {
  if record_ids.is_empty() {
    return Ok(Vec::new());
  }

  let placeholders = vec!["?"; record_ids.len()].join(", ");
  let sql = format!(
    "SELECT c.record_id, c.person_id, p.version, p.record_count, p.created
     FROM person_crosswalk c
     JOIN persons p ON p.person_id = c.person_id
     WHERE c.record_id IN ({placeholders})
     ORDER BY c.record_id"
  );

  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(rusqlite::params_from_iter(record_ids.iter()), |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, i64>(2)?,
        row.get::<_, i64>(3)?,
        row.get::<_, String>(4)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  rows
    .into_iter()
    .map(|(record_id, person_id, version, count, created)| {
      Ok(CrosswalkEntry {
        record_id,
        person_id:      crate::encode::decode_uuid(&person_id)?,
        person_version: version,
        record_count:   count,
        person_created: crate::encode::decode_dt(&created)?,
      })
    })
    .collect()
}

/// Rewrite crosswalk rows per `moves`, bump the touched persons' versions and
/// record counts, tombstone emptied persons, and write the person actions.
///
/// Each person's current version is checked against the version observed at
/// analysis time before anything changes; a mismatch aborts with
/// [`Error::PersonVersionConflict`] so the caller's transaction rolls back.
fn apply_moves(
  conn: &rusqlite::Connection,
  now: &str,
  event_id: i64,
  actor: Actor,
  moves: &[PersonMove],
) -> Result<()> {
  let mut expected: BTreeMap<Uuid, i64> = BTreeMap::new();
  for mv in moves {
    expected.entry(mv.from_person).or_insert(mv.from_version);
    expected.entry(mv.to_person).or_insert(mv.to_version);
  }

  for (&person_id, &version) in &expected {
    let id_str = encode_uuid(person_id);
    let found: Option<i64> = conn
      .query_row(
        "SELECT version FROM persons WHERE person_id = ?1",
        rusqlite::params![id_str],
        |row| row.get(0),
      )
      .optional()?;

    match found {
      None => return Err(CoreError::PersonNotFound(person_id).into()),
      Some(found) if found != version => {
        return Err(Error::PersonVersionConflict {
          person_id,
          expected: version,
          found,
        });
      }
      Some(_) => {}
    }
  }

  for mv in moves {
    let from_str = encode_uuid(mv.from_person);
    let to_str = encode_uuid(mv.to_person);
    let group_str = encode_uuid(mv.group_id);

    conn.execute(
      "UPDATE person_crosswalk SET person_id = ?1 WHERE record_id = ?2",
      rusqlite::params![to_str, mv.record_id],
    )?;
    conn.execute(
      "UPDATE persons SET record_count = record_count - 1 WHERE person_id = ?1",
      rusqlite::params![from_str],
    )?;
    conn.execute(
      "UPDATE persons SET record_count = record_count + 1 WHERE person_id = ?1",
      rusqlite::params![to_str],
    )?;

    insert_person_action(
      conn,
      event_id,
      Some(&group_str),
      &from_str,
      mv.record_id,
      PersonActionKind::RemoveRecord,
      actor,
    )?;
    insert_person_action(
      conn,
      event_id,
      Some(&group_str),
      &to_str,
      mv.record_id,
      PersonActionKind::AddRecord,
      actor,
    )?;
  }

  // One version bump per touched person, not per move.
  for &person_id in expected.keys() {
    let id_str = encode_uuid(person_id);
    conn.execute(
      "UPDATE persons SET version = version + 1, updated = ?1
       WHERE person_id = ?2",
      rusqlite::params![now, id_str],
    )?;
    conn.execute(
      "UPDATE persons SET deleted = ?1
       WHERE person_id = ?2 AND record_count = 0 AND deleted IS NULL",
      rusqlite::params![now, id_str],
    )?;
  }

  Ok(())
}

// ─── MatchStore impl ─────────────────────────────────────────────────────────

impl MatchStore for SqliteStore {
  type Error = Error;

  // ── Configs ───────────────────────────────────────────────────────────────

  async fn create_config(&self, input: NewMatchConfig) -> Result<MatchConfig> {
    input.thresholds.validate()?;

    let created = Utc::now();
    let created_str = encode_dt(created);
    let rules_str = serde_json::to_string(&input.linkage_rules)?;
    let thresholds = input.thresholds;

    let config_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO configs
             (created, linkage_rules, potential_match_threshold, auto_match_threshold)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            created_str,
            rules_str,
            thresholds.potential_match,
            thresholds.auto_match,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(MatchConfig {
      config_id,
      created,
      linkage_rules: input.linkage_rules,
      thresholds,
    })
  }

  async fn get_config(&self, config_id: i64) -> Result<Option<MatchConfig>> {
    let raw: Option<RawConfig> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT config_id, created, linkage_rules,
                      potential_match_threshold, auto_match_threshold
               FROM configs WHERE config_id = ?1",
              rusqlite::params![config_id],
              |row| {
                Ok(RawConfig {
                  config_id: row.get(0)?,
                  created:   row.get(1)?,
                  linkage_rules: row.get(2)?,
                  potential: row.get(3)?,
                  auto:      row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawConfig::into_config).transpose()
  }

  // ── Job queue ─────────────────────────────────────────────────────────────

  async fn enqueue_job(&self, input: NewJob) -> Result<Job> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let kind_str = encode_job_kind(input.kind);
    let config_id = input.config_id;
    let source_uri = input.source_uri.clone();

    let job_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO jobs (created, updated, kind, status, config_id, source_uri)
           VALUES (?1, ?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            now_str,
            kind_str,
            encode_job_status(JobStatus::New),
            config_id,
            source_uri,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Job {
      job_id,
      created: now,
      updated: now,
      kind: input.kind,
      status: JobStatus::New,
      config_id: input.config_id,
      source_uri: input.source_uri,
      reason: None,
    })
  }

  async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| Ok(select_job(conn, job_id)?))
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn claim_next_job(&self) -> Result<Option<Job>> {
    let now_str = encode_dt(Utc::now());

    // BEGIN IMMEDIATE takes the write lock up front, so two workers racing
    // for the queue serialize here and only one sees the job as 'new'.
    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
          .query_row(
            &format!(
              "SELECT {JOB_COLUMNS} FROM jobs
               WHERE status = 'new' ORDER BY job_id LIMIT 1"
            ),
            [],
            job_from_row,
          )
          .optional()?;

        let Some(raw) = raw else {
          return Ok(None);
        };

        tx.execute(
          "UPDATE jobs SET status = 'running', updated = ?1 WHERE job_id = ?2",
          rusqlite::params![now_str, raw.job_id],
        )?;
        tx.commit()?;

        Ok(Some(RawJob {
          status: "running".to_owned(),
          updated: now_str.clone(),
          ..raw
        }))
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn claim_job(&self, job_id: i64) -> Result<Job> {
    let now_str = encode_dt(Utc::now());

    let raw: Result<RawJob> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(raw) = select_job(&tx, job_id)? else {
          return Ok(Err(CoreError::JobNotFound(job_id).into()));
        };

        let status = match decode_job_status(&raw.status) {
          Ok(s) => s,
          Err(e) => return Ok(Err(e)),
        };
        if status != JobStatus::New {
          return Ok(Err(CoreError::JobAlreadyRunning(job_id, status).into()));
        }

        tx.execute(
          "UPDATE jobs SET status = 'running', updated = ?1 WHERE job_id = ?2",
          rusqlite::params![now_str, job_id],
        )?;
        tx.commit()?;

        Ok(Ok(RawJob {
          status: "running".to_owned(),
          updated: now_str.clone(),
          ..raw
        }))
      })
      .await?;

    raw?.into_job()
  }

  async fn complete_job(&self, job_id: i64, outcome: JobOutcome) -> Result<Job> {
    let now_str = encode_dt(Utc::now());
    let (next, reason) = match outcome {
      JobOutcome::Succeeded => (JobStatus::Succeeded, None),
      JobOutcome::Failed { reason } => (JobStatus::Failed, Some(reason)),
    };

    let raw: Result<RawJob> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(raw) = select_job(&tx, job_id)? else {
          return Ok(Err(CoreError::JobNotFound(job_id).into()));
        };

        let job = match raw.into_job() {
          Ok(j) => j,
          Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = job.check_transition(next) {
          return Ok(Err(e.into()));
        }

        tx.execute(
          "UPDATE jobs SET status = ?1, reason = ?2, updated = ?3
           WHERE job_id = ?4",
          rusqlite::params![encode_job_status(next), reason, now_str, job_id],
        )?;
        tx.commit()?;

        match select_job(conn, job_id)? {
          Some(raw) => Ok(Ok(raw)),
          None => Ok(Err(CoreError::JobNotFound(job_id).into())),
        }
      })
      .await?;

    raw?.into_job()
  }

  // ── Records & persons ─────────────────────────────────────────────────────

  async fn import_records(
    &self,
    job_id: i64,
    records: Vec<NewPersonRecord>,
  ) -> Result<ImportSummary> {
    let now_str = encode_dt(Utc::now());

    let summary: ImportSummary = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let event_id = insert_event(
          &tx,
          &now_str,
          Some(job_id),
          MatchEventKind::NewIdentities,
        )?;

        let mut loaded = 0;
        let mut skipped = 0;

        for record in &records {
          let d = &record.demographics;
          let fingerprint = d.fingerprint();

          let duplicate: bool = tx
            .query_row(
              "SELECT 1 FROM person_records WHERE fingerprint = ?1",
              rusqlite::params![fingerprint],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
          if duplicate {
            skipped += 1;
            continue;
          }

          tx.execute(
            "INSERT INTO person_records (
               created, job_id, fingerprint,
               data_source, source_person_id, first_name, last_name, sex,
               race, birth_date, death_date, social_security_number,
               address, city, state, zip_code, county, phone
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                       ?13, ?14, ?15, ?16, ?17, ?18)",
            rusqlite::params![
              now_str,
              job_id,
              fingerprint,
              d.data_source,
              d.source_person_id,
              d.first_name,
              d.last_name,
              d.sex,
              d.race,
              d.birth_date,
              d.death_date,
              d.social_security_number,
              d.address,
              d.city,
              d.state,
              d.zip_code,
              d.county,
              d.phone,
            ],
          )?;
          let record_id = tx.last_insert_rowid();

          // Every new record starts life as its own singleton person.
          let person_id = encode_uuid(Uuid::new_v4());
          tx.execute(
            "INSERT INTO persons
               (person_id, created, updated, version, record_count, job_id)
             VALUES (?1, ?2, ?2, 1, 1, ?3)",
            rusqlite::params![person_id, now_str, job_id],
          )?;
          tx.execute(
            "INSERT INTO person_crosswalk (record_id, person_id) VALUES (?1, ?2)",
            rusqlite::params![record_id, person_id],
          )?;

          insert_person_action(
            &tx,
            event_id,
            None,
            &person_id,
            record_id,
            PersonActionKind::AddRecord,
            Actor::System,
          )?;

          loaded += 1;
        }

        tx.commit()?;
        Ok(ImportSummary { loaded, skipped })
      })
      .await?;

    Ok(summary)
  }

  async fn all_records(&self) -> Result<Vec<PersonRecord>> {
    let raws: Vec<RawPersonRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM person_records ORDER BY record_id"
        ))?;
        let rows = stmt
          .query_map([], record_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPersonRecord::into_record).collect()
  }

  async fn get_person(&self, person_id: Uuid) -> Result<Option<Person>> {
    let id_str = encode_uuid(person_id);

    let raw: Option<RawPerson> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT person_id, created, updated, version, record_count,
                      job_id, deleted
               FROM persons WHERE person_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawPerson {
                  person_id:    row.get(0)?,
                  created:      row.get(1)?,
                  updated:      row.get(2)?,
                  version:      row.get(3)?,
                  record_count: row.get(4)?,
                  job_id:       row.get(5)?,
                  deleted:      row.get(6)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPerson::into_person).transpose()
  }

  async fn crosswalk_for_records(
    &self,
    record_ids: &[i64],
  ) -> Result<Vec<CrosswalkEntry>> {
    let ids = record_ids.to_vec();

    let entries: Result<Vec<CrosswalkEntry>> = self
      .conn
      .call(move |conn| Ok(crosswalk_rows(conn, &ids)))
      .await?;

    entries
  }

  // ── Match resolution ──────────────────────────────────────────────────────

  async fn apply_match_analysis(
    &self,
    job_id: i64,
    pairs: &[ScoredPair],
    analysis: &MatchAnalysis,
  ) -> Result<MatchEvent> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let pairs = pairs.to_vec();
    let analysis = analysis.clone();

    let event: Result<MatchEvent> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let event_id = insert_event(
          &tx,
          &now_str,
          Some(job_id),
          MatchEventKind::AutoMatches,
        )?;

        // Supersede all still-pending groups. This run re-analyzed the whole
        // record set, so earlier pending groups are stale whether or not a
        // replacement group was produced.
        let stale: Vec<String> = {
          let mut stmt = tx.prepare(
            "SELECT group_id FROM match_groups
             WHERE matched IS NULL AND deleted IS NULL",
          )?;
          let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows
        };
        for group_id in &stale {
          tx.execute(
            "UPDATE match_groups
             SET deleted = ?1, updated = ?1, version = version + 1
             WHERE group_id = ?2",
            rusqlite::params![now_str, group_id],
          )?;

          let score_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
              "SELECT score_id FROM pair_scores WHERE group_id = ?1",
            )?;
            let rows = stmt
              .query_map(rusqlite::params![group_id], |row| row.get(0))?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
          };
          for score_id in score_ids {
            insert_group_action(
              &tx,
              event_id,
              group_id,
              Some(score_id),
              MatchGroupActionKind::RemoveScore,
              Actor::System,
            )?;
          }
        }

        for group in &analysis.groups {
          let group_str = encode_uuid(group.group_id);
          let matched = match group.outcome {
            GroupOutcome::AutoMatched => Some(now_str.as_str()),
            GroupOutcome::Pending => None,
          };

          tx.execute(
            "INSERT INTO match_groups
               (group_id, created, updated, job_id, version, matched)
             VALUES (?1, ?2, ?2, ?3, 1, ?4)",
            rusqlite::params![group_str, now_str, job_id, matched],
          )?;

          // The engine may emit an unordered pair in both orientations; they
          // collapse onto one normalized key here, keeping the highest
          // probability, so the unique index never aborts the apply.
          let mut best: BTreeMap<(i64, i64), &ScoredPair> = BTreeMap::new();
          for &pair_idx in &group.pair_indices {
            let pair = &pairs[pair_idx];
            let key = if pair.left_record_id <= pair.right_record_id {
              (pair.left_record_id, pair.right_record_id)
            } else {
              (pair.right_record_id, pair.left_record_id)
            };
            best
              .entry(key)
              .and_modify(|existing| {
                if pair.probability > existing.probability {
                  *existing = pair;
                }
              })
              .or_insert(pair);
          }

          for (&(left, right), pair) in &best {
            tx.execute(
              "INSERT INTO pair_scores
                 (created, group_id, job_id, left_record_id, right_record_id,
                  probability, match_weight)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
              rusqlite::params![
                now_str,
                group_str,
                job_id,
                left,
                right,
                pair.probability,
                pair.match_weight,
              ],
            )?;
            let score_id = tx.last_insert_rowid();

            insert_group_action(
              &tx,
              event_id,
              &group_str,
              Some(score_id),
              MatchGroupActionKind::AddScore,
              Actor::System,
            )?;
          }
        }

        if let Err(e) =
          apply_moves(&tx, &now_str, event_id, Actor::System, &analysis.moves)
        {
          return Ok(Err(e));
        }

        tx.commit()?;

        Ok(Ok(MatchEvent {
          event_id,
          created: now,
          job_id: Some(job_id),
          kind: MatchEventKind::AutoMatches,
        }))
      })
      .await?;

    event
  }

  async fn pending_match_groups(&self) -> Result<Vec<PotentialMatch>> {
    let (raw_groups, raw_scores): (Vec<RawMatchGroup>, Vec<RawPairScore>) =
      self
        .conn
        .call(move |conn| {
          let groups = {
            let mut stmt = conn.prepare(&format!(
              "SELECT {GROUP_COLUMNS} FROM match_groups
               WHERE matched IS NULL AND deleted IS NULL
               ORDER BY created, group_id"
            ))?;
            let rows = stmt
              .query_map([], group_from_row)?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
          };

          let scores = {
            let mut stmt = conn.prepare(
              "SELECT s.score_id, s.created, s.group_id, s.job_id,
                      s.left_record_id, s.right_record_id, s.probability,
                      s.match_weight
               FROM pair_scores s
               JOIN match_groups g ON g.group_id = s.group_id
               WHERE g.matched IS NULL AND g.deleted IS NULL
               ORDER BY s.score_id",
            )?;
            let rows = stmt
              .query_map([], |row| {
                Ok(RawPairScore {
                  score_id:        row.get(0)?,
                  created:         row.get(1)?,
                  group_id:        row.get(2)?,
                  job_id:          row.get(3)?,
                  left_record_id:  row.get(4)?,
                  right_record_id: row.get(5)?,
                  probability:     row.get(6)?,
                  match_weight:    row.get(7)?,
                })
              })?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
          };

          Ok((groups, scores))
        })
        .await?;

    let mut scores_by_group: BTreeMap<Uuid, Vec<_>> = BTreeMap::new();
    for raw in raw_scores {
      let score = raw.into_score()?;
      scores_by_group.entry(score.group_id).or_default().push(score);
    }

    raw_groups
      .into_iter()
      .map(|raw| {
        let group: MatchGroup = raw.into_group()?;
        let scores =
          scores_by_group.remove(&group.group_id).unwrap_or_default();
        Ok(PotentialMatch { group, scores })
      })
      .collect()
  }

  async fn approve_match_group(
    &self,
    group_id: Uuid,
    user_id: i64,
  ) -> Result<MatchEvent> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let group_str = encode_uuid(group_id);

    let event: Result<MatchEvent> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
          .query_row(
            &format!(
              "SELECT {GROUP_COLUMNS} FROM match_groups WHERE group_id = ?1"
            ),
            rusqlite::params![group_str],
            group_from_row,
          )
          .optional()?;
        let Some(raw) = raw else {
          return Ok(Err(CoreError::MatchGroupNotFound(group_id).into()));
        };

        let group = match raw.into_group() {
          Ok(g) => g,
          Err(e) => return Ok(Err(e)),
        };
        if !group.is_pending() {
          return Ok(Err(CoreError::AlreadyResolved(group_id).into()));
        }

        let record_ids: Vec<i64> = {
          let mut stmt = tx.prepare(
            "SELECT left_record_id FROM pair_scores WHERE group_id = ?1
             UNION
             SELECT right_record_id FROM pair_scores WHERE group_id = ?1
             ORDER BY 1",
          )?;
          let rows = stmt
            .query_map(rusqlite::params![group_str], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows
        };

        let entries = match crosswalk_rows(&tx, &record_ids) {
          Ok(e) => e,
          Err(e) => return Ok(Err(e)),
        };
        let moves = match cluster::merge_moves(group_id, &record_ids, &entries)
        {
          Ok(m) => m,
          Err(e) => return Ok(Err(e.into())),
        };

        let event_id =
          insert_event(&tx, &now_str, None, MatchEventKind::ManualMatch)?;
        insert_group_action(
          &tx,
          event_id,
          &group_str,
          None,
          MatchGroupActionKind::Match,
          Actor::User(user_id),
        )?;

        if let Err(e) =
          apply_moves(&tx, &now_str, event_id, Actor::User(user_id), &moves)
        {
          return Ok(Err(e));
        }

        tx.execute(
          "UPDATE match_groups
           SET matched = ?1, updated = ?1, version = version + 1
           WHERE group_id = ?2",
          rusqlite::params![now_str, group_str],
        )?;
        tx.commit()?;

        Ok(Ok(MatchEvent {
          event_id,
          created: now,
          job_id: None,
          kind: MatchEventKind::ManualMatch,
        }))
      })
      .await?;

    event
  }

  async fn reject_match_group(
    &self,
    group_id: Uuid,
    user_id: i64,
  ) -> Result<MatchEvent> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let group_str = encode_uuid(group_id);

    let event: Result<MatchEvent> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
          .query_row(
            &format!(
              "SELECT {GROUP_COLUMNS} FROM match_groups WHERE group_id = ?1"
            ),
            rusqlite::params![group_str],
            group_from_row,
          )
          .optional()?;
        let Some(raw) = raw else {
          return Ok(Err(CoreError::MatchGroupNotFound(group_id).into()));
        };

        let group = match raw.into_group() {
          Ok(g) => g,
          Err(e) => return Ok(Err(e)),
        };
        if !group.is_pending() {
          return Ok(Err(CoreError::AlreadyResolved(group_id).into()));
        }

        let event_id =
          insert_event(&tx, &now_str, None, MatchEventKind::ManualReject)?;
        insert_group_action(
          &tx,
          event_id,
          &group_str,
          None,
          MatchGroupActionKind::Reject,
          Actor::User(user_id),
        )?;

        // Rejection never touches persons; records stay where they are.
        tx.execute(
          "UPDATE match_groups
           SET deleted = ?1, updated = ?1, version = version + 1
           WHERE group_id = ?2",
          rusqlite::params![now_str, group_str],
        )?;
        tx.commit()?;

        Ok(Ok(MatchEvent {
          event_id,
          created: now,
          job_id: None,
          kind: MatchEventKind::ManualReject,
        }))
      })
      .await?;

    event
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn add_user(&self, input: NewUser) -> Result<User> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let idp_user_id = input.idp_user_id.clone();
    let role_str = encode_user_role(input.role);

    let user_id: Result<i64> = self
      .conn
      .call(move |conn| {
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx
          .query_row(
            "SELECT 1 FROM users WHERE idp_user_id = ?1",
            rusqlite::params![idp_user_id],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if exists {
          return Ok(Err(CoreError::UserAlreadyExists(idp_user_id).into()));
        }

        tx.execute(
          "INSERT INTO users (created, idp_user_id, role) VALUES (?1, ?2, ?3)",
          rusqlite::params![now_str, idp_user_id, role_str],
        )?;
        let user_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Ok(user_id))
      })
      .await?;

    Ok(User {
      user_id: user_id?,
      created: now,
      idp_user_id: input.idp_user_id,
      role: input.role,
    })
  }

  async fn get_user_by_idp_id(&self, idp_user_id: &str) -> Result<Option<User>> {
    let idp = idp_user_id.to_owned();

    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, created, idp_user_id, role
               FROM users WHERE idp_user_id = ?1",
              rusqlite::params![idp],
              |row| {
                Ok(RawUser {
                  user_id:     row.get(0)?,
                  created:     row.get(1)?,
                  idp_user_id: row.get(2)?,
                  role:        row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn list_users(&self) -> Result<Vec<User>> {
    let raws: Vec<RawUser> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, created, idp_user_id, role FROM users
           ORDER BY user_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawUser {
              user_id:     row.get(0)?,
              created:     row.get(1)?,
              idp_user_id: row.get(2)?,
              role:        row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUser::into_user).collect()
  }
}
