//! The `MatchStore` and `ObjectStore` traits.
//!
//! `MatchStore` is implemented by storage backends (e.g.
//! `kindred-store-sqlite`). The matching pipeline and the worker depend on
//! these abstractions, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  audit::MatchEvent,
  cluster::{MatchAnalysis, ScoredPair},
  config::{MatchConfig, NewMatchConfig},
  group::PotentialMatch,
  job::{Job, JobOutcome, NewJob},
  person::{CrosswalkEntry, Person},
  record::{ImportSummary, NewPersonRecord, PersonRecord},
  user::{NewUser, User},
};

// ─── MatchStore ──────────────────────────────────────────────────────────────

/// Abstraction over the durable matching state.
///
/// All coordination between workers happens through this store; workers share
/// no in-memory state. Claim operations must be atomic: when two claimers
/// race, exactly one observes the job as claimable.
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded async runtimes.
pub trait MatchStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Configs ───────────────────────────────────────────────────────────

  /// Persist a new matching configuration. Configs are immutable once
  /// created.
  fn create_config(
    &self,
    input: NewMatchConfig,
  ) -> impl Future<Output = Result<MatchConfig, Self::Error>> + Send + '_;

  fn get_config(
    &self,
    config_id: i64,
  ) -> impl Future<Output = Result<Option<MatchConfig>, Self::Error>> + Send + '_;

  // ── Job queue ─────────────────────────────────────────────────────────

  /// Insert a job with status `New`.
  fn enqueue_job(
    &self,
    input: NewJob,
  ) -> impl Future<Output = Result<Job, Self::Error>> + Send + '_;

  fn get_job(
    &self,
    job_id: i64,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  /// Claim the oldest `New` job, flipping it to `Running` atomically.
  /// Returns `None` when the queue has no eligible job.
  fn claim_next_job(
    &self,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  /// Claim a specific job for a manual re-run. Fails with a not-found error
  /// if absent and an already-running error if it is not `New`.
  fn claim_job(
    &self,
    job_id: i64,
  ) -> impl Future<Output = Result<Job, Self::Error>> + Send + '_;

  /// Move a `Running` job to its terminal state. The failure reason is
  /// stored verbatim; success clears it.
  fn complete_job(
    &self,
    job_id: i64,
    outcome: JobOutcome,
  ) -> impl Future<Output = Result<Job, Self::Error>> + Send + '_;

  // ── Records & persons ─────────────────────────────────────────────────

  /// Import records for a job: drop exact duplicates by fingerprint, give
  /// every surviving record a fresh singleton person and crosswalk row, and
  /// record a `new-identities` event. One transaction.
  fn import_records(
    &self,
    job_id: i64,
    records: Vec<NewPersonRecord>,
  ) -> impl Future<Output = Result<ImportSummary, Self::Error>> + Send + '_;

  /// All records, in import order, as fed to the linkage engine.
  fn all_records(
    &self,
  ) -> impl Future<Output = Result<Vec<PersonRecord>, Self::Error>> + Send + '_;

  fn get_person(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Crosswalk entries for the given records, with person metadata attached.
  fn crosswalk_for_records<'a>(
    &'a self,
    record_ids: &'a [i64],
  ) -> impl Future<Output = Result<Vec<CrosswalkEntry>, Self::Error>> + Send + 'a;

  // ── Match resolution ──────────────────────────────────────────────────

  /// Apply a match analysis for a job: supersede pending groups from earlier
  /// jobs, insert the new groups and their pair scores, perform the
  /// crosswalk moves with person version bumps, and write the audit trail.
  /// One transaction; partial results are never visible.
  fn apply_match_analysis<'a>(
    &'a self,
    job_id: i64,
    pairs: &'a [ScoredPair],
    analysis: &'a MatchAnalysis,
  ) -> impl Future<Output = Result<MatchEvent, Self::Error>> + Send + 'a;

  /// Pending groups with their scores, oldest first.
  fn pending_match_groups(
    &self,
  ) -> impl Future<Output = Result<Vec<PotentialMatch>, Self::Error>> + Send + '_;

  /// Approve a pending group: merge its records exactly as an auto-match
  /// would, attributed to `user_id`. Terminal; a resolved group answers with
  /// an already-resolved error.
  fn approve_match_group(
    &self,
    group_id: Uuid,
    user_id: i64,
  ) -> impl Future<Output = Result<MatchEvent, Self::Error>> + Send + '_;

  /// Reject a pending group: mark it deleted without touching any person.
  /// Terminal, like approval.
  fn reject_match_group(
    &self,
    group_id: Uuid,
    user_id: i64,
  ) -> impl Future<Output = Result<MatchEvent, Self::Error>> + Send + '_;

  // ── Users ─────────────────────────────────────────────────────────────

  fn add_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user_by_idp_id<'a>(
    &'a self,
    idp_user_id: &'a str,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + 'a;

  fn list_users(
    &self,
  ) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;
}

// ─── ObjectStore ─────────────────────────────────────────────────────────────

/// Abstraction over bulk object storage. URIs are opaque
/// `scheme://bucket/key` strings; the core never interprets them beyond
/// handing them to an implementation.
pub trait ObjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Retrieve the bytes at `uri`. Fails with the implementation's not-found
  /// error if absent.
  fn get<'a>(
    &'a self,
    uri: &'a str,
  ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send + 'a;

  /// Store `bytes` at `uri`, replacing any previous object.
  fn put<'a>(
    &'a self,
    uri: &'a str,
    bytes: &'a [u8],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
