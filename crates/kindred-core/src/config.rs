//! Versioned matching configuration.
//!
//! A config captures the linkage rules handed to the external scoring engine
//! together with the two probability thresholds that drive the decision
//! policy. Configs are immutable once created; jobs reference them, they are
//! never edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Thresholds ──────────────────────────────────────────────────────────────

/// The two probability cutoffs separating automatic merge, human review and
/// no-link outcomes. Comparisons against them are inclusive: a pair exactly
/// at a threshold satisfies it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
  /// Pairs at or above this probability are worth a human look.
  pub potential_match: f64,
  /// Pairs at or above this probability merge without review.
  pub auto_match:      f64,
}

impl Thresholds {
  pub fn new(potential_match: f64, auto_match: f64) -> Result<Self> {
    let t = Self { potential_match, auto_match };
    t.validate()?;
    Ok(t)
  }

  pub fn validate(&self) -> Result<()> {
    let in_unit =
      |p: f64| (0.0..=1.0).contains(&p) && p.is_finite();

    if !in_unit(self.potential_match)
      || !in_unit(self.auto_match)
      || self.auto_match < self.potential_match
    {
      return Err(Error::InvalidThresholds {
        potential: self.potential_match,
        auto:      self.auto_match,
      });
    }
    Ok(())
  }

  pub fn meets_potential(&self, probability: f64) -> bool {
    probability >= self.potential_match
  }

  pub fn meets_auto(&self, probability: f64) -> bool {
    probability >= self.auto_match
  }
}

// ─── MatchConfig ─────────────────────────────────────────────────────────────

/// A persisted, versioned matching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
  pub config_id:     i64,
  pub created:       DateTime<Utc>,
  /// Comparison and blocking rules, passed opaquely to the linkage engine.
  /// The core never interprets this value.
  pub linkage_rules: serde_json::Value,
  pub thresholds:    Thresholds,
}

/// Input to [`crate::store::MatchStore::create_config`].
/// `config_id` and `created` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMatchConfig {
  pub linkage_rules: serde_json::Value,
  pub thresholds:    Thresholds,
}

impl NewMatchConfig {
  pub fn new(
    linkage_rules: serde_json::Value,
    thresholds: Thresholds,
  ) -> Result<Self> {
    thresholds.validate()?;
    Ok(Self { linkage_rules, thresholds })
  }
}
