//! Person records — one source system's raw demographic record.
//!
//! Records are immutable after import. Identity resolution never touches the
//! record itself; it only moves the crosswalk link between record and person.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─── Demographics ────────────────────────────────────────────────────────────

/// The demographic payload of a record, as supplied by the source system.
/// All fields are free text; normalization is the source's concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
  pub data_source:            String,
  pub source_person_id:       String,
  pub first_name:             String,
  pub last_name:              String,
  pub sex:                    String,
  pub race:                   String,
  pub birth_date:             String,
  pub death_date:             String,
  pub social_security_number: String,
  pub address:                String,
  pub city:                   String,
  pub state:                  String,
  pub zip_code:               String,
  pub county:                 String,
  pub phone:                  String,
}

impl Demographics {
  /// Hex sha256 over the fields joined with `|`, in declaration order.
  /// Used to skip exact-duplicate records at import time.
  pub fn fingerprint(&self) -> String {
    let joined = [
      &self.data_source,
      &self.source_person_id,
      &self.first_name,
      &self.last_name,
      &self.sex,
      &self.race,
      &self.birth_date,
      &self.death_date,
      &self.social_security_number,
      &self.address,
      &self.city,
      &self.state,
      &self.zip_code,
      &self.county,
      &self.phone,
    ]
    .map(String::as_str)
    .join("|");

    hex::encode(Sha256::digest(joined.as_bytes()))
  }
}

// ─── PersonRecord ────────────────────────────────────────────────────────────

/// An imported record. The owning job tells the matcher which records are new
/// and still need comparing; old records are only ever compared against new
/// ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
  pub record_id:    i64,
  pub created:      DateTime<Utc>,
  pub job_id:       i64,
  pub fingerprint:  String,
  pub demographics: Demographics,
}

/// Input to [`crate::store::MatchStore::import_records`].
#[derive(Debug, Clone)]
pub struct NewPersonRecord {
  pub demographics: Demographics,
}

/// What an import actually did, after duplicate elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
  pub loaded:  usize,
  pub skipped: usize,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Demographics {
    Demographics {
      data_source: "clinic-a".into(),
      source_person_id: "123".into(),
      first_name: "Alice".into(),
      last_name: "Liddell".into(),
      birth_date: "1990-01-02".into(),
      ..Default::default()
    }
  }

  #[test]
  fn fingerprint_is_stable() {
    assert_eq!(sample().fingerprint(), sample().fingerprint());
  }

  #[test]
  fn fingerprint_changes_with_any_field() {
    let a = sample();
    let mut b = sample();
    b.phone = "555-0100".into();
    assert_ne!(a.fingerprint(), b.fingerprint());
  }
}
