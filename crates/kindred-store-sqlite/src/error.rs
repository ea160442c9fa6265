//! Error type for `kindred-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kindred_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {column} value: {value:?}")]
  UnknownDiscriminant { column: &'static str, value: String },

  /// A person's version changed between analysis and apply. The caller should
  /// re-run the analysis against fresh crosswalk state.
  #[error(
    "person {person_id} changed concurrently: expected version {expected}, \
     found {found}"
  )]
  PersonVersionConflict {
    person_id: Uuid,
    expected:  i64,
    found:     i64,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
