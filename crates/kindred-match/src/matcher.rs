//! [`Matcher`] — the child-process side of a job.
//!
//! Runs the full pipeline for one claimed job: pull the input from the
//! object store, import records, score them with the linkage engine, and
//! apply the threshold policy to the person graph. Job status is deliberately
//! out of scope here; the parent process owns it and infers success or
//! failure from this process's exit.

use kindred_core::{
  Error as CoreError,
  cluster::{self, ScoredPair},
  config::MatchConfig,
  job::{Job, JobKind},
  store::{MatchStore, ObjectStore},
};
use tracing::info;

use crate::{Error, Result, csv, engine::LinkageEngine};

pub struct Matcher<S, O, E> {
  store:   S,
  objects: O,
  engine:  E,
}

impl<S, O, E> Matcher<S, O, E>
where
  S: MatchStore,
  O: ObjectStore,
  E: LinkageEngine,
{
  pub fn new(store: S, objects: O, engine: E) -> Self {
    Self { store, objects, engine }
  }

  /// Execute the pipeline for `job_id`. The job must already exist; its
  /// status is not inspected, since the claiming parent dictates lifecycle.
  pub async fn run(&self, job_id: i64) -> Result<()> {
    let job = self
      .store
      .get_job(job_id)
      .await
      .map_err(Error::store)?
      .ok_or(CoreError::JobNotFound(job_id))?;

    let config = self
      .store
      .get_config(job.config_id)
      .await
      .map_err(Error::store)?
      .ok_or(CoreError::ConfigNotFound(job.config_id))?;

    match job.kind {
      JobKind::ImportPersonRecords => self.run_import(&job, &config).await,
      JobKind::ExportPotentialMatches => self.run_export(&job).await,
    }
  }

  async fn run_import(&self, job: &Job, config: &MatchConfig) -> Result<()> {
    let bytes = self
      .objects
      .get(&job.source_uri)
      .await
      .map_err(Error::object_store)?;
    let records = csv::parse_records(&bytes)?;

    let summary = self
      .store
      .import_records(job.job_id, records)
      .await
      .map_err(Error::store)?;
    info!(
      job_id = job.job_id,
      loaded = summary.loaded,
      skipped = summary.skipped,
      "records imported"
    );

    let all = self.store.all_records().await.map_err(Error::store)?;
    if all.is_empty() {
      return Ok(());
    }

    let scored = self
      .engine
      .score(config, &all)
      .await
      .map_err(|e| Error::Engine(e.to_string()))?;

    // Pairs below the review floor never form groups; drop them before
    // clustering so they cannot chain unrelated components together.
    let pairs: Vec<ScoredPair> = scored
      .into_iter()
      .filter(|p| config.thresholds.meets_potential(p.probability))
      .collect();

    let mut record_ids: Vec<i64> = pairs
      .iter()
      .flat_map(|p| [p.left_record_id, p.right_record_id])
      .collect();
    record_ids.sort_unstable();
    record_ids.dedup();

    let crosswalk = self
      .store
      .crosswalk_for_records(&record_ids)
      .await
      .map_err(Error::store)?;

    let analysis = cluster::analyze(&pairs, &crosswalk, config.thresholds)?;
    info!(
      job_id = job.job_id,
      groups = analysis.groups.len(),
      moves = analysis.moves.len(),
      "applying match analysis"
    );

    self
      .store
      .apply_match_analysis(job.job_id, &pairs, &analysis)
      .await
      .map_err(Error::store)?;

    Ok(())
  }

  async fn run_export(&self, job: &Job) -> Result<()> {
    let pending =
      self.store.pending_match_groups().await.map_err(Error::store)?;
    let rendered = csv::render_potential_matches(&pending)?;

    self
      .objects
      .put(&job.source_uri, &rendered)
      .await
      .map_err(Error::object_store)?;

    info!(
      job_id = job.job_id,
      groups = pending.len(),
      uri = job.source_uri,
      "potential matches exported"
    );
    Ok(())
  }
}
