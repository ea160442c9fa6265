//! The immutable audit trail.
//!
//! Every mutation of matching state hangs off a [`MatchEvent`]: the event
//! names what happened and when, and the action rows record which groups,
//! persons and records were touched, attributed to either the system or a
//! reviewing user. All three tables are append-only; nothing here is ever
//! updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "lowercase")]
pub enum Actor {
  System,
  User(i64),
}

impl Actor {
  pub fn user_id(self) -> Option<i64> {
    match self {
      Self::System => None,
      Self::User(id) => Some(id),
    }
  }
}

// ─── MatchEvent ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchEventKind {
  /// Fresh persons were assigned to newly imported records.
  NewIdentities,
  /// The system merged records whose scores cleared the auto-match threshold.
  AutoMatches,
  /// A reviewer approved a potential match.
  ManualMatch,
  /// A reviewer rejected a potential match.
  ManualReject,
}

/// Events are sequentially ordered by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
  pub event_id: i64,
  pub created:  DateTime<Utc>,
  pub job_id:   Option<i64>,
  pub kind:     MatchEventKind,
}

// ─── MatchGroupAction ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchGroupActionKind {
  /// A pair score was attached to the group.
  AddScore,
  /// A pair score was moved out of the group (group superseded).
  RemoveScore,
  /// The group was resolved as matched.
  Match,
  /// The group was resolved as rejected.
  Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGroupAction {
  pub action_id: i64,
  pub event_id:  i64,
  pub group_id:  Uuid,
  pub score_id:  Option<i64>,
  pub kind:      MatchGroupActionKind,
  pub actor:     Actor,
}

// ─── PersonAction ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonActionKind {
  /// A record joined this person.
  AddRecord,
  /// A record left this person.
  RemoveRecord,
  /// A reviewer confirmed a record's existing membership.
  Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonAction {
  pub action_id: i64,
  pub event_id:  i64,
  /// The active group (if any) this action happened under.
  pub group_id:  Option<Uuid>,
  pub person_id: Uuid,
  pub record_id: i64,
  pub kind:      PersonActionKind,
  pub actor:     Actor,
}
