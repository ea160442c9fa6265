//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Linkage rules are stored as
//! compact JSON. UUIDs are stored as hyphenated lowercase strings. Enum
//! discriminants use the same kebab-case spellings as the serde
//! representations in `kindred-core`.

use chrono::{DateTime, Utc};
use kindred_core::{
  audit::{Actor, MatchEventKind, MatchGroupActionKind, PersonActionKind},
  config::{MatchConfig, Thresholds},
  group::{MatchGroup, PairScore},
  job::{Job, JobKind, JobStatus},
  person::Person,
  record::{Demographics, PersonRecord},
  user::{User, UserRole},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_dt_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── JobStatus ───────────────────────────────────────────────────────────────

pub fn encode_job_status(s: JobStatus) -> &'static str {
  match s {
    JobStatus::New => "new",
    JobStatus::Running => "running",
    JobStatus::Succeeded => "succeeded",
    JobStatus::Failed => "failed",
  }
}

pub fn decode_job_status(s: &str) -> Result<JobStatus> {
  match s {
    "new" => Ok(JobStatus::New),
    "running" => Ok(JobStatus::Running),
    "succeeded" => Ok(JobStatus::Succeeded),
    "failed" => Ok(JobStatus::Failed),
    other => Err(Error::UnknownDiscriminant {
      column: "jobs.status",
      value:  other.to_owned(),
    }),
  }
}

// ─── JobKind ─────────────────────────────────────────────────────────────────

pub fn encode_job_kind(k: JobKind) -> &'static str {
  match k {
    JobKind::ImportPersonRecords => "import-person-records",
    JobKind::ExportPotentialMatches => "export-potential-matches",
  }
}

pub fn decode_job_kind(s: &str) -> Result<JobKind> {
  match s {
    "import-person-records" => Ok(JobKind::ImportPersonRecords),
    "export-potential-matches" => Ok(JobKind::ExportPotentialMatches),
    other => Err(Error::UnknownDiscriminant {
      column: "jobs.kind",
      value:  other.to_owned(),
    }),
  }
}

// ─── MatchEventKind ──────────────────────────────────────────────────────────

pub fn encode_event_kind(k: MatchEventKind) -> &'static str {
  match k {
    MatchEventKind::NewIdentities => "new-identities",
    MatchEventKind::AutoMatches => "auto-matches",
    MatchEventKind::ManualMatch => "manual-match",
    MatchEventKind::ManualReject => "manual-reject",
  }
}

// ─── Action kinds ────────────────────────────────────────────────────────────

pub fn encode_group_action_kind(k: MatchGroupActionKind) -> &'static str {
  match k {
    MatchGroupActionKind::AddScore => "add-score",
    MatchGroupActionKind::RemoveScore => "remove-score",
    MatchGroupActionKind::Match => "match",
    MatchGroupActionKind::Reject => "reject",
  }
}

pub fn encode_person_action_kind(k: PersonActionKind) -> &'static str {
  match k {
    PersonActionKind::AddRecord => "add-record",
    PersonActionKind::RemoveRecord => "remove-record",
    PersonActionKind::Review => "review",
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Actors are stored as a nullable `user_id` column; NULL means the system.
pub fn encode_actor(a: Actor) -> Option<i64> { a.user_id() }

// ─── UserRole ────────────────────────────────────────────────────────────────

pub fn encode_user_role(r: UserRole) -> &'static str {
  match r {
    UserRole::Admin => "admin",
    UserRole::Member => "member",
  }
}

pub fn decode_user_role(s: &str) -> Result<UserRole> {
  match s {
    "admin" => Ok(UserRole::Admin),
    "member" => Ok(UserRole::Member),
    other => Err(Error::UnknownDiscriminant {
      column: "users.role",
      value:  other.to_owned(),
    }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `configs` row.
pub struct RawConfig {
  pub config_id:     i64,
  pub created:       String,
  pub linkage_rules: String,
  pub potential:     f64,
  pub auto:          f64,
}

impl RawConfig {
  pub fn into_config(self) -> Result<MatchConfig> {
    Ok(MatchConfig {
      config_id:     self.config_id,
      created:       decode_dt(&self.created)?,
      linkage_rules: serde_json::from_str(&self.linkage_rules)?,
      thresholds:    Thresholds {
        potential_match: self.potential,
        auto_match:      self.auto,
      },
    })
  }
}

/// Raw strings read directly from a `jobs` row.
pub struct RawJob {
  pub job_id:     i64,
  pub created:    String,
  pub updated:    String,
  pub kind:       String,
  pub status:     String,
  pub config_id:  i64,
  pub source_uri: String,
  pub reason:     Option<String>,
}

impl RawJob {
  pub fn into_job(self) -> Result<Job> {
    Ok(Job {
      job_id:     self.job_id,
      created:    decode_dt(&self.created)?,
      updated:    decode_dt(&self.updated)?,
      kind:       decode_job_kind(&self.kind)?,
      status:     decode_job_status(&self.status)?,
      config_id:  self.config_id,
      source_uri: self.source_uri,
      reason:     self.reason,
    })
  }
}

/// Raw strings read directly from a `person_records` row.
pub struct RawPersonRecord {
  pub record_id:    i64,
  pub created:      String,
  pub job_id:       i64,
  pub fingerprint:  String,
  pub demographics: Demographics,
}

impl RawPersonRecord {
  pub fn into_record(self) -> Result<PersonRecord> {
    Ok(PersonRecord {
      record_id:    self.record_id,
      created:      decode_dt(&self.created)?,
      job_id:       self.job_id,
      fingerprint:  self.fingerprint,
      demographics: self.demographics,
    })
  }
}

/// Raw strings read directly from a `persons` row.
pub struct RawPerson {
  pub person_id:    String,
  pub created:      String,
  pub updated:      String,
  pub version:      i64,
  pub record_count: i64,
  pub job_id:       Option<i64>,
  pub deleted:      Option<String>,
}

impl RawPerson {
  pub fn into_person(self) -> Result<Person> {
    Ok(Person {
      person_id:    decode_uuid(&self.person_id)?,
      created:      decode_dt(&self.created)?,
      updated:      decode_dt(&self.updated)?,
      version:      self.version,
      record_count: self.record_count,
      job_id:       self.job_id,
      deleted:      decode_dt_opt(self.deleted.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `match_groups` row.
pub struct RawMatchGroup {
  pub group_id: String,
  pub created:  String,
  pub updated:  String,
  pub job_id:   i64,
  pub version:  i64,
  pub matched:  Option<String>,
  pub deleted:  Option<String>,
}

impl RawMatchGroup {
  pub fn into_group(self) -> Result<MatchGroup> {
    Ok(MatchGroup {
      group_id: decode_uuid(&self.group_id)?,
      created:  decode_dt(&self.created)?,
      updated:  decode_dt(&self.updated)?,
      job_id:   self.job_id,
      version:  self.version,
      matched:  decode_dt_opt(self.matched.as_deref())?,
      deleted:  decode_dt_opt(self.deleted.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `pair_scores` row.
pub struct RawPairScore {
  pub score_id:        i64,
  pub created:         String,
  pub group_id:        String,
  pub job_id:          i64,
  pub left_record_id:  i64,
  pub right_record_id: i64,
  pub probability:     f64,
  pub match_weight:    f64,
}

impl RawPairScore {
  pub fn into_score(self) -> Result<PairScore> {
    Ok(PairScore {
      score_id:        self.score_id,
      created:         decode_dt(&self.created)?,
      group_id:        decode_uuid(&self.group_id)?,
      job_id:          self.job_id,
      left_record_id:  self.left_record_id,
      right_record_id: self.right_record_id,
      probability:     self.probability,
      match_weight:    self.match_weight,
    })
  }
}

/// Raw strings read directly from a `users` row.
pub struct RawUser {
  pub user_id:     i64,
  pub created:     String,
  pub idp_user_id: String,
  pub role:        String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:     self.user_id,
      created:     decode_dt(&self.created)?,
      idp_user_id: self.idp_user_id,
      role:        decode_user_role(&self.role)?,
    })
  }
}
