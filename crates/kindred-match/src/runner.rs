//! [`JobRunner`] — subprocess isolation for one job's matching work.
//!
//! The heavy part of a matching run (the external linkage engine, the graph
//! mutations) executes in a child process so that its failure modes — crash,
//! out-of-memory, runaway loop — cannot take the worker's control loop down
//! with it. The child's termination state is the only channel back to the
//! parent.

use std::process::Stdio;

use tokio::{
  io::{AsyncBufReadExt as _, BufReader},
  process::{Child, Command},
};
use tracing::{info, warn};

use crate::Result;

// ─── RunOutcome ──────────────────────────────────────────────────────────────

/// How the child terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
  /// The child's exit code; `-1` when it was killed by a signal.
  pub exit_code: i32,
  /// `None` on exit code 0. Otherwise the accumulated stderr, or a sentinel
  /// when the child said nothing.
  pub error:     Option<String>,
}

impl RunOutcome {
  pub fn is_success(&self) -> bool { self.exit_code == 0 }
}

/// Stored when a failing child produced no stderr at all.
const UNKNOWN_ERROR: &str = "Unknown error occurred";

// ─── JobRunner ───────────────────────────────────────────────────────────────

/// Runs a configured command with the job id appended as its final argument.
#[derive(Debug, Clone)]
pub struct JobRunner {
  program: String,
  args:    Vec<String>,
}

impl JobRunner {
  pub fn new(
    program: impl Into<String>,
    args: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      program: program.into(),
      args:    args.into_iter().map(Into::into).collect(),
    }
  }

  /// Execute the child for `job_id` and wait for it to finish.
  ///
  /// Stdout lines are forwarded to the log as they arrive. Stderr lines are
  /// forwarded too, and accumulated verbatim for the failure reason. If this
  /// returns early for any reason the child is killed and reaped first, so
  /// no zombie is left behind.
  pub async fn run(&self, job_id: i64) -> Result<RunOutcome> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .arg(job_id.to_string())
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let stderr_text = match drain_streams(&mut child, job_id).await {
      Ok(text) => text,
      Err(e) => {
        let _ = child.kill().await;
        return Err(e);
      }
    };

    let status = match child.wait().await {
      Ok(status) => status,
      Err(e) => {
        let _ = child.kill().await;
        return Err(e.into());
      }
    };

    let exit_code = status.code().unwrap_or(-1);
    let error = if exit_code == 0 {
      None
    } else if stderr_text.is_empty() {
      Some(UNKNOWN_ERROR.to_owned())
    } else {
      Some(stderr_text)
    };

    Ok(RunOutcome { exit_code, error })
  }
}

/// Drain both output streams concurrently until each closes, so neither pipe
/// can fill up and stall the child.
async fn drain_streams(child: &mut Child, job_id: i64) -> Result<String> {
  // Both pipes were requested at spawn time.
  let stdout = child.stdout.take();
  let stderr = child.stderr.take();

  let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
  let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

  let mut captured = String::new();

  loop {
    tokio::select! {
      line = next_line(&mut stdout_lines), if stdout_lines.is_some() => {
        match line? {
          Some(line) => info!(job_id, "{line}"),
          None => stdout_lines = None,
        }
      }
      line = next_line(&mut stderr_lines), if stderr_lines.is_some() => {
        match line? {
          Some(line) => {
            warn!(job_id, "{line}");
            captured.push_str(&line);
            captured.push('\n');
          }
          None => stderr_lines = None,
        }
      }
      else => break,
    }
  }

  Ok(captured)
}

async fn next_line(
  lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> std::io::Result<Option<String>> {
  match lines {
    Some(lines) => lines.next_line().await,
    None => Ok(None),
  }
}
