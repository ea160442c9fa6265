//! The linkage-engine seam.
//!
//! Probabilistic scoring is supplied externally; this crate only defines the
//! contract and one implementation that shells out to a configured command.

use std::{future::Future, process::Stdio};

use kindred_core::{
  cluster::ScoredPair,
  config::MatchConfig,
  record::PersonRecord,
};
use tokio::{io::AsyncWriteExt as _, process::Command};

use crate::{Error, Result, csv};

// ─── LinkageEngine ───────────────────────────────────────────────────────────

/// Scores record pairs under a configuration's linkage rules.
///
/// Implementations decide their own blocking strategy; the caller only
/// requires that returned probabilities lie in `[0, 1]` and that record ids
/// reference the records it was given.
pub trait LinkageEngine: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn score<'a>(
    &'a self,
    config: &'a MatchConfig,
    records: &'a [PersonRecord],
  ) -> impl Future<Output = Result<Vec<ScoredPair>, Self::Error>> + Send + 'a;
}

// ─── CommandEngine ───────────────────────────────────────────────────────────

/// Invokes an external scoring command.
///
/// The linkage rules are passed as a JSON argument; the record batch is
/// written to the child's stdin as CSV and scored pairs are read back from
/// its stdout, also as CSV.
#[derive(Debug, Clone)]
pub struct CommandEngine {
  program: String,
  args:    Vec<String>,
}

impl CommandEngine {
  pub fn new(
    program: impl Into<String>,
    args: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      program: program.into(),
      args:    args.into_iter().map(Into::into).collect(),
    }
  }
}

impl LinkageEngine for CommandEngine {
  type Error = Error;

  async fn score(
    &self,
    config: &MatchConfig,
    records: &[PersonRecord],
  ) -> Result<Vec<ScoredPair>> {
    let rules = serde_json::to_string(&config.linkage_rules)?;
    let input = csv::render_records(records)?;

    let mut child = Command::new(&self.program)
      .args(&self.args)
      .arg(rules)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let Some(mut stdin) = child.stdin.take() else {
      return Err(Error::Engine("engine stdin unavailable".into()));
    };

    // Feed stdin from a separate task while draining stdout, so a child that
    // interleaves reading and writing cannot deadlock on a full pipe. The
    // child may also close stdin early; its exit status is authoritative.
    let writer = tokio::spawn(async move {
      let res = stdin.write_all(&input).await;
      drop(stdin);
      res
    });

    let output = child.wait_with_output().await?;
    let _ = writer.await;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      let detail = if stderr.trim().is_empty() {
        format!("exit code {}", output.status.code().unwrap_or(-1))
      } else {
        stderr.trim_end().to_owned()
      };
      return Err(Error::Engine(detail));
    }

    csv::parse_scored_pairs(&output.stdout)
  }
}
