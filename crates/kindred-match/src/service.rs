//! [`MatchingService`] — the worker's control loop body.
//!
//! Claims a job, hands it to the [`JobRunner`], and records the terminal
//! status. This is the only place job status is written during execution;
//! the child process writes matching results but never job state, so partial
//! results stay invisible until the parent flips the job out of `running`.

use kindred_core::{
  job::{Job, JobOutcome},
  store::MatchStore,
};
use tracing::{error, info};

use crate::{
  Error, Result,
  runner::{JobRunner, RunOutcome},
};

/// What one pass of the control loop did.
#[derive(Debug, Clone)]
pub enum Tick {
  /// No eligible job in the queue.
  Idle,
  /// A job was claimed and driven to a terminal state.
  Completed(Job),
}

pub struct MatchingService<S> {
  store:  S,
  runner: JobRunner,
}

impl<S: MatchStore> MatchingService<S> {
  pub fn new(store: S, runner: JobRunner) -> Self {
    Self { store, runner }
  }

  pub fn store(&self) -> &S { &self.store }

  /// Claim and execute the oldest eligible job. Returns [`Tick::Idle`] when
  /// the queue is empty.
  pub async fn run_next_job(&self) -> Result<Tick> {
    let Some(job) = self.store.claim_next_job().await.map_err(Error::store)?
    else {
      return Ok(Tick::Idle);
    };

    let job = self.execute(job).await?;
    Ok(Tick::Completed(job))
  }

  /// Claim and execute a specific job, for manual re-runs.
  pub async fn run_job(&self, job_id: i64) -> Result<Job> {
    let job = self.store.claim_job(job_id).await.map_err(Error::store)?;
    self.execute(job).await
  }

  /// Drive a claimed job to a terminal state.
  ///
  /// This is the failure boundary for one job's execution: whatever the
  /// runner does — nonzero exit, spawn failure, I/O error — becomes a failed
  /// job with a reason, never an error that escapes the control loop. Only
  /// failures to record the outcome itself propagate.
  async fn execute(&self, job: Job) -> Result<Job> {
    info!(job_id = job.job_id, kind = ?job.kind, "job started");

    let outcome = match self.runner.run(job.job_id).await {
      Ok(RunOutcome { error: None, .. }) => JobOutcome::Succeeded,
      Ok(RunOutcome { exit_code, error: Some(reason) }) => {
        error!(job_id = job.job_id, exit_code, reason, "job process failed");
        JobOutcome::Failed { reason }
      }
      Err(e) => {
        error!(job_id = job.job_id, error = %e, "job execution failed");
        JobOutcome::Failed { reason: e.to_string() }
      }
    };

    let job = self
      .store
      .complete_job(job.job_id, outcome)
      .await
      .map_err(Error::store)?;

    info!(job_id = job.job_id, status = %job.status, "job finished");
    Ok(job)
  }
}
