//! Jobs — the unit of asynchronous work.
//!
//! A job is enqueued with status `New`, claimed by exactly one worker
//! (flipping it to `Running`), and finishes in a terminal `Succeeded` or
//! `Failed` state. Failed jobs are not retried automatically; retrying means
//! enqueueing a fresh job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  New,
  Running,
  Succeeded,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed)
  }

  /// Transitions are monotone: New -> Running -> {Succeeded, Failed}.
  /// A terminal status never changes again.
  pub fn can_transition_to(self, next: JobStatus) -> bool {
    matches!(
      (self, next),
      (Self::New, Self::Running)
        | (Self::Running, Self::Succeeded)
        | (Self::Running, Self::Failed)
    )
  }
}

impl std::fmt::Display for JobStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::New => "new",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
    };
    f.write_str(s)
  }
}

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
  ImportPersonRecords,
  ExportPotentialMatches,
}

// ─── Job ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub job_id:     i64,
  pub created:    DateTime<Utc>,
  pub updated:    DateTime<Utc>,
  pub kind:       JobKind,
  pub status:     JobStatus,
  pub config_id:  i64,
  /// Input location for imports, output location for exports.
  /// Opaque `scheme://bucket/key` form, resolved by the object store.
  pub source_uri: String,
  /// Human-readable failure reason; `None` unless status is `Failed`.
  pub reason:     Option<String>,
}

impl Job {
  /// Check that moving this job to `next` respects monotonicity.
  pub fn check_transition(&self, next: JobStatus) -> Result<()> {
    if self.status.can_transition_to(next) {
      Ok(())
    } else {
      Err(Error::InvalidJobTransition { from: self.status, to: next })
    }
  }
}

/// The terminal result a worker reports for a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
  Succeeded,
  Failed { reason: String },
}

/// Input to [`crate::store::MatchStore::enqueue_job`].
#[derive(Debug, Clone)]
pub struct NewJob {
  pub kind:       JobKind,
  pub config_id:  i64,
  pub source_uri: String,
}
