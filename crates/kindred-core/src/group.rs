//! Match groups and pair scores.
//!
//! A match group is a candidate cluster of records awaiting a decision. It is
//! pending while both `matched` and `deleted` are unset; setting either is
//! terminal. Pair scores belong to their group and are only ever removed with
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── MatchGroup ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGroup {
  pub group_id: Uuid,
  pub created:  DateTime<Utc>,
  pub updated:  DateTime<Utc>,
  pub job_id:   i64,
  pub version:  i64,
  /// Set when the group was merged, automatically or by a reviewer.
  pub matched:  Option<DateTime<Utc>>,
  /// Set when the group was rejected by a reviewer, or superseded by a later
  /// matching run. Superseded groups are kept so the audit trail stays
  /// resolvable.
  pub deleted:  Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupResolution {
  Pending,
  Matched,
  Rejected,
}

impl MatchGroup {
  pub fn resolution(&self) -> GroupResolution {
    match (self.matched, self.deleted) {
      (Some(_), _) => GroupResolution::Matched,
      (None, Some(_)) => GroupResolution::Rejected,
      (None, None) => GroupResolution::Pending,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.resolution() == GroupResolution::Pending
  }
}

// ─── PairScore ───────────────────────────────────────────────────────────────

/// One pairwise comparison result from the linkage engine, attached to its
/// group. Record ids are stored normalized (`left < right`) so an unordered
/// pair appears at most once per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairScore {
  pub score_id:        i64,
  pub created:         DateTime<Utc>,
  pub group_id:        Uuid,
  pub job_id:          i64,
  pub left_record_id:  i64,
  pub right_record_id: i64,
  pub probability:     f64,
  pub match_weight:    f64,
}

/// A pending group bundled with its scores, as handed to reviewers and the
/// export path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentialMatch {
  pub group:  MatchGroup,
  pub scores: Vec<PairScore>,
}
