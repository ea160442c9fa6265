//! Clustering and the two-threshold decision policy.
//!
//! Pairwise scores from the linkage engine become connected components over
//! record ids; records already sharing a person are clustered too, so an
//! existing identity is never split across candidate groups. Each component
//! is then resolved against the configured thresholds:
//!
//! - every pair at or above the auto-match threshold: the component merges
//!   into one person, no review;
//! - otherwise, if its best pair reaches the potential-match threshold: the
//!   component becomes a pending match group for human review;
//! - otherwise no group is created at all.
//!
//! Threshold comparisons are inclusive. The output is a plain value — the
//! store applies it transactionally.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
  Error, Result,
  config::Thresholds,
  person::CrosswalkEntry,
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// One scored pair from the linkage engine. Record ids are unordered; the
/// analysis normalizes them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
  pub left_record_id:  i64,
  pub right_record_id: i64,
  pub probability:     f64,
  pub match_weight:    f64,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
  /// All pairs cleared the auto-match threshold; merge without review.
  AutoMatched,
  /// At least the best pair cleared the potential-match threshold; hold for
  /// review.
  Pending,
}

/// One connected component that survived the policy.
#[derive(Debug, Clone)]
pub struct CandidateGroup {
  pub group_id:     Uuid,
  pub outcome:      GroupOutcome,
  /// Indices into the input pair slice.
  pub pair_indices: Vec<usize>,
  pub record_ids:   Vec<i64>,
}

/// A crosswalk rewrite required by an auto-match: move `record_id` from its
/// current person to the group's representative person. Versions are the
/// ones observed at analysis time; the store re-checks them on apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonMove {
  pub group_id:     Uuid,
  pub record_id:    i64,
  pub from_person:  Uuid,
  pub from_version: i64,
  pub to_person:    Uuid,
  pub to_version:   i64,
}

#[derive(Debug, Clone, Default)]
pub struct MatchAnalysis {
  pub groups: Vec<CandidateGroup>,
  pub moves:  Vec<PersonMove>,
}

// ─── Union-find ──────────────────────────────────────────────────────────────

struct DisjointSets {
  parent: Vec<usize>,
}

impl DisjointSets {
  fn new(len: usize) -> Self {
    Self { parent: (0..len).collect() }
  }

  fn find(&mut self, x: usize) -> usize {
    if self.parent[x] != x {
      let root = self.find(self.parent[x]);
      self.parent[x] = root;
    }
    self.parent[x]
  }

  fn union(&mut self, a: usize, b: usize) {
    let ra = self.find(a);
    let rb = self.find(b);
    if ra != rb {
      self.parent[rb] = ra;
    }
  }
}

// ─── Analysis ────────────────────────────────────────────────────────────────

/// Choose the representative person for a merge: most records first, then
/// oldest, then smallest id. Deterministic so re-running a merge picks the
/// same survivor.
pub fn choose_person<'a>(
  candidates: impl IntoIterator<Item = &'a CrosswalkEntry>,
) -> Option<&'a CrosswalkEntry> {
  candidates.into_iter().min_by(|a, b| {
    b.record_count
      .cmp(&a.record_count)
      .then(a.person_created.cmp(&b.person_created))
      .then(a.person_id.cmp(&b.person_id))
  })
}

/// Compute the crosswalk moves that merge `record_ids` into one person,
/// chosen by [`choose_person`]. Used both for auto-matches and for manual
/// approvals, so the two paths merge identically.
pub fn merge_moves(
  group_id: Uuid,
  record_ids: &[i64],
  crosswalk: &[CrosswalkEntry],
) -> Result<Vec<PersonMove>> {
  let by_record: HashMap<i64, &CrosswalkEntry> =
    crosswalk.iter().map(|e| (e.record_id, e)).collect();

  for id in record_ids {
    if !by_record.contains_key(id) {
      return Err(Error::InconsistentMatchInput(format!(
        "no crosswalk entry for person record {id}"
      )));
    }
  }

  let mut persons: Vec<&CrosswalkEntry> =
    record_ids.iter().map(|id| by_record[id]).collect();
  persons.sort_by_key(|e| e.person_id);
  persons.dedup_by_key(|e| e.person_id);

  let Some(chosen) = choose_person(persons.iter().copied()) else {
    return Ok(Vec::new());
  };

  let mut moves = Vec::new();
  for id in record_ids {
    let entry = by_record[id];
    if entry.person_id != chosen.person_id {
      moves.push(PersonMove {
        group_id,
        record_id:    *id,
        from_person:  entry.person_id,
        from_version: entry.person_version,
        to_person:    chosen.person_id,
        to_version:   chosen.person_version,
      });
    }
  }
  Ok(moves)
}

/// Cluster scored pairs and apply the threshold policy.
///
/// `crosswalk` must contain exactly one entry for every record referenced by
/// `pairs`; extra entries are ignored, missing ones are an error.
pub fn analyze(
  pairs: &[ScoredPair],
  crosswalk: &[CrosswalkEntry],
  thresholds: Thresholds,
) -> Result<MatchAnalysis> {
  thresholds.validate()?;

  if pairs.is_empty() {
    return Ok(MatchAnalysis::default());
  }

  let by_record: HashMap<i64, &CrosswalkEntry> =
    crosswalk.iter().map(|e| (e.record_id, e)).collect();

  // Index every referenced record.
  let mut record_idx: HashMap<i64, usize> = HashMap::new();
  let mut records: Vec<i64> = Vec::new();
  let mut index_of = |id: i64, records: &mut Vec<i64>| {
    *record_idx.entry(id).or_insert_with(|| {
      records.push(id);
      records.len() - 1
    })
  };

  for pair in pairs {
    index_of(pair.left_record_id, &mut records);
    index_of(pair.right_record_id, &mut records);
  }

  for id in &records {
    if !by_record.contains_key(id) {
      return Err(Error::InconsistentMatchInput(format!(
        "no crosswalk entry for person record {id}"
      )));
    }
  }

  let mut sets = DisjointSets::new(records.len());

  // Pair edges.
  for pair in pairs {
    sets.union(
      record_idx[&pair.left_record_id],
      record_idx[&pair.right_record_id],
    );
  }

  // Shared-person edges: records that already belong to the same person must
  // land in the same component.
  let mut first_for_person: HashMap<Uuid, usize> = HashMap::new();
  for (idx, id) in records.iter().enumerate() {
    let person_id = by_record[id].person_id;
    match first_for_person.get(&person_id) {
      Some(&first) => sets.union(first, idx),
      None => {
        first_for_person.insert(person_id, idx);
      }
    }
  }

  // Gather components.
  let mut component_records: HashMap<usize, Vec<i64>> = HashMap::new();
  for (idx, id) in records.iter().enumerate() {
    component_records.entry(sets.find(idx)).or_default().push(*id);
  }

  let mut component_pairs: HashMap<usize, Vec<usize>> = HashMap::new();
  for (pair_idx, pair) in pairs.iter().enumerate() {
    let root = sets.find(record_idx[&pair.left_record_id]);
    component_pairs.entry(root).or_default().push(pair_idx);
  }

  // Deterministic component order keeps output stable for tests and replay.
  let mut roots: Vec<usize> = component_records.keys().copied().collect();
  roots.sort_by_key(|root| component_records[root].iter().min().copied());

  let mut analysis = MatchAnalysis::default();

  for root in roots {
    let pair_indices = component_pairs.remove(&root).unwrap_or_default();
    if pair_indices.is_empty() {
      continue;
    }

    let probs = pair_indices.iter().map(|&i| pairs[i].probability);
    let max_p = probs.clone().fold(f64::MIN, f64::max);
    let min_p = probs.fold(f64::MAX, f64::min);

    if !thresholds.meets_potential(max_p) {
      // Below the review floor entirely: no group, records stay put.
      continue;
    }

    let mut record_ids = component_records.remove(&root).unwrap_or_default();
    record_ids.sort_unstable();

    let group_id = Uuid::new_v4();

    if thresholds.meets_auto(min_p) {
      // Merge everything into the representative person.
      analysis
        .moves
        .extend(merge_moves(group_id, &record_ids, crosswalk)?);

      analysis.groups.push(CandidateGroup {
        group_id,
        outcome: GroupOutcome::AutoMatched,
        pair_indices,
        record_ids,
      });
    } else {
      analysis.groups.push(CandidateGroup {
        group_id,
        outcome: GroupOutcome::Pending,
        pair_indices,
        record_ids,
      });
    }
  }

  Ok(analysis)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  fn entry(record_id: i64, person: u128, version: i64, count: i64) -> CrosswalkEntry {
    CrosswalkEntry {
      record_id,
      person_id: Uuid::from_u128(person),
      person_version: version,
      record_count: count,
      person_created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
  }

  fn pair(l: i64, r: i64, p: f64) -> ScoredPair {
    ScoredPair {
      left_record_id:  l,
      right_record_id: r,
      probability:     p,
      match_weight:    0.0,
    }
  }

  fn thresholds() -> Thresholds {
    Thresholds::new(0.8, 0.95).unwrap()
  }

  #[test]
  fn auto_pending_and_discarded_components() {
    let crosswalk: Vec<_> =
      (1..=6).map(|i| entry(i, i as u128, 1, 1)).collect();
    let pairs = vec![
      // Auto: both pairs clear 0.95.
      pair(1, 2, 0.97),
      pair(2, 3, 0.99),
      // Pending: above 0.8, below 0.95.
      pair(4, 5, 0.85),
      pair(5, 4, 0.90),
      // Discarded entirely (analyzed separately below).
      pair(6, 1, 0.5),
    ];
    let analysis = analyze(&pairs[..4], &crosswalk, thresholds()).unwrap();

    assert_eq!(analysis.groups.len(), 2);
    assert_eq!(analysis.groups[0].outcome, GroupOutcome::AutoMatched);
    assert_eq!(analysis.groups[0].record_ids, vec![1, 2, 3]);
    assert_eq!(analysis.groups[1].outcome, GroupOutcome::Pending);
    assert_eq!(analysis.groups[1].record_ids, vec![4, 5]);

    // Moves only for the auto group: records 2 and 3 join record 1's person.
    assert_eq!(analysis.moves.len(), 2);

    let low = analyze(&[pair(6, 1, 0.5)], &crosswalk, thresholds()).unwrap();
    assert!(low.groups.is_empty());
    assert!(low.moves.is_empty());
  }

  #[test]
  fn threshold_boundaries_are_inclusive() {
    let crosswalk: Vec<_> =
      (1..=4).map(|i| entry(i, i as u128, 1, 1)).collect();

    let exactly_auto =
      analyze(&[pair(1, 2, 0.95)], &crosswalk, thresholds()).unwrap();
    assert_eq!(exactly_auto.groups[0].outcome, GroupOutcome::AutoMatched);

    let exactly_potential =
      analyze(&[pair(3, 4, 0.8)], &crosswalk, thresholds()).unwrap();
    assert_eq!(exactly_potential.groups[0].outcome, GroupOutcome::Pending);
  }

  #[test]
  fn representative_person_prefers_record_count_then_age_then_id() {
    let older = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();

    let mut big = entry(1, 10, 3, 5);
    let mut old = entry(2, 11, 2, 1);
    old.person_created = older;
    let small = entry(3, 12, 1, 1);

    // Most records wins.
    assert_eq!(
      choose_person([&big, &old, &small]).unwrap().person_id,
      big.person_id
    );

    // With counts tied, oldest wins.
    big.record_count = 1;
    assert_eq!(
      choose_person([&big, &old, &small]).unwrap().person_id,
      old.person_id
    );

    // Fully tied: smallest id wins.
    old.person_created = big.person_created;
    assert_eq!(
      choose_person([&big, &old, &small]).unwrap().person_id,
      big.person_id
    );
  }

  #[test]
  fn records_sharing_a_person_cluster_together() {
    // Records 1 and 2 already belong to person 10; a pending pair touching
    // record 1 must keep record 2's component joined.
    let crosswalk =
      vec![entry(1, 10, 2, 2), entry(2, 10, 2, 2), entry(3, 11, 1, 1)];
    let pairs = vec![pair(1, 3, 0.85), pair(2, 3, 0.86)];

    let analysis = analyze(&pairs, &crosswalk, thresholds()).unwrap();
    assert_eq!(analysis.groups.len(), 1);
    assert_eq!(analysis.groups[0].record_ids, vec![1, 2, 3]);
  }

  #[test]
  fn auto_match_into_existing_person_reuses_it() {
    // Person 10 already holds two records; the new singleton joins it.
    let crosswalk =
      vec![entry(1, 10, 4, 2), entry(2, 10, 4, 2), entry(3, 11, 1, 1)];
    let pairs = vec![pair(1, 3, 0.99), pair(2, 3, 0.98)];

    let analysis = analyze(&pairs, &crosswalk, thresholds()).unwrap();
    assert_eq!(analysis.groups.len(), 1);
    assert_eq!(analysis.moves.len(), 1);

    let mv = &analysis.moves[0];
    assert_eq!(mv.record_id, 3);
    assert_eq!(mv.from_person, Uuid::from_u128(11));
    assert_eq!(mv.to_person, Uuid::from_u128(10));
    assert_eq!(mv.to_version, 4);
  }

  #[test]
  fn missing_crosswalk_entry_is_an_error() {
    let crosswalk = vec![entry(1, 10, 1, 1)];
    let err = analyze(&[pair(1, 2, 0.9)], &crosswalk, thresholds());
    assert!(matches!(err, Err(Error::InconsistentMatchInput(_))));
  }
}
