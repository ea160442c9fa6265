//! Opaque, type-prefixed external ids.
//!
//! Internal ids are plain integers or UUIDs; anything that leaves the system
//! carries a short type prefix (`job_7`, `p_<uuid>`) so callers can tell
//! resource kinds apart. This is presentation only — nothing in the core
//! keys off the prefixed form.

use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
  Config,
  Job,
  Person,
  PersonRecord,
  PotentialMatch,
}

impl ObjectKind {
  pub fn prefix(self) -> &'static str {
    match self {
      Self::Config => "cfg",
      Self::Job => "job",
      Self::Person => "p",
      Self::PersonRecord => "pr",
      Self::PotentialMatch => "pm",
    }
  }
}

/// Render an integer-keyed id, e.g. `job_7`.
pub fn render_int(kind: ObjectKind, id: i64) -> String {
  format!("{}_{id}", kind.prefix())
}

/// Render a uuid-keyed id, e.g. `p_6f9d…`.
pub fn render_uuid(kind: ObjectKind, id: Uuid) -> String {
  format!("{}_{}", kind.prefix(), id.hyphenated())
}

fn strip<'a>(kind: ObjectKind, s: &'a str) -> Result<&'a str> {
  s.strip_prefix(kind.prefix())
    .and_then(|rest| rest.strip_prefix('_'))
    .ok_or_else(|| Error::InvalidObjectId(s.to_owned()))
}

/// Parse an integer-keyed external id, checking the prefix.
pub fn parse_int(kind: ObjectKind, s: &str) -> Result<i64> {
  strip(kind, s)?
    .parse()
    .map_err(|_| Error::InvalidObjectId(s.to_owned()))
}

/// Parse a uuid-keyed external id, checking the prefix.
pub fn parse_uuid(kind: ObjectKind, s: &str) -> Result<Uuid> {
  Uuid::parse_str(strip(kind, s)?)
    .map_err(|_| Error::InvalidObjectId(s.to_owned()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn int_ids_round_trip() {
    let rendered = render_int(ObjectKind::Job, 42);
    assert_eq!(rendered, "job_42");
    assert_eq!(parse_int(ObjectKind::Job, &rendered).unwrap(), 42);
  }

  #[test]
  fn uuid_ids_round_trip() {
    let id = Uuid::new_v4();
    let rendered = render_uuid(ObjectKind::Person, id);
    assert!(rendered.starts_with("p_"));
    assert_eq!(parse_uuid(ObjectKind::Person, &rendered).unwrap(), id);
  }

  #[test]
  fn wrong_prefix_is_rejected() {
    assert!(parse_int(ObjectKind::Job, "cfg_1").is_err());
    assert!(parse_int(ObjectKind::Job, "job-1").is_err());
    assert!(parse_uuid(ObjectKind::Person, "p_not-a-uuid").is_err());
  }
}
