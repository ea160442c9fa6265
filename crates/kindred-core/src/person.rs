//! Persons and the record-to-person crosswalk.
//!
//! A person is the canonical resolved identity. Records never reference their
//! person directly; the crosswalk is the only mutable link between the two,
//! which keeps stale back-references impossible. Every membership change
//! rewrites crosswalk rows in the same transaction that bumps the person's
//! version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical identity. Never deleted: a person whose records have all been
/// moved away keeps its row as a historical anchor, marked with a `deleted`
/// timestamp so reads can skip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
  pub person_id:    Uuid,
  pub created:      DateTime<Utc>,
  pub updated:      DateTime<Utc>,
  /// Strictly increments on every membership change, starting at 1.
  pub version:      i64,
  pub record_count: i64,
  /// The job whose matching run created this person; `None` for persons
  /// created during a human review.
  pub job_id:       Option<i64>,
  pub deleted:      Option<DateTime<Utc>>,
}

/// One row per person record: the record's current person, with the person
/// version and record count captured at link time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosswalkEntry {
  pub record_id:      i64,
  pub person_id:      Uuid,
  pub person_version: i64,
  pub record_count:   i64,
  pub person_created: DateTime<Utc>,
}
