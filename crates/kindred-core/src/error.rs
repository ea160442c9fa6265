//! Error types for `kindred-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("config not found: {0}")]
  ConfigNotFound(i64),

  #[error("job not found: {0}")]
  JobNotFound(i64),

  #[error("person not found: {0}")]
  PersonNotFound(Uuid),

  #[error("person record not found: {0}")]
  PersonRecordNotFound(i64),

  #[error("match group not found: {0}")]
  MatchGroupNotFound(Uuid),

  #[error("job {0} is not claimable: already {1}")]
  JobAlreadyRunning(i64, JobStatus),

  /// Attempted to approve or reject a match group that has already been
  /// matched or rejected. Resolution is terminal.
  #[error("match group {0} is already resolved")]
  AlreadyResolved(Uuid),

  #[error(
    "invalid thresholds: auto-match threshold {auto} must be >= potential-match threshold {potential}, both within [0, 1]"
  )]
  InvalidThresholds { potential: f64, auto: f64 },

  #[error("invalid job transition: {from} -> {to}")]
  InvalidJobTransition { from: JobStatus, to: JobStatus },

  #[error("invalid object id: {0:?}")]
  InvalidObjectId(String),

  #[error("user not found: {0:?}")]
  UserNotFound(String),

  #[error("user already exists: {0:?}")]
  UserAlreadyExists(String),

  #[error("inconsistent match input: {0}")]
  InconsistentMatchInput(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
