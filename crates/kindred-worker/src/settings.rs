//! Worker configuration.
//!
//! Read from a TOML file with `KINDRED_*` environment overrides. Everything
//! the worker and its child processes need is threaded from here; there is
//! no ambient global configuration.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Path to the SQLite database file.
  pub store_path:  PathBuf,
  /// Root directory backing `scheme://bucket/key` object URIs.
  pub object_root: PathBuf,

  /// Seconds to sleep when the job queue is empty.
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,

  /// The command the job runner spawns per job. Defaults to re-invoking this
  /// binary's `run-job` subcommand.
  #[serde(default)]
  pub runner: CommandConfig,

  /// The external linkage engine invoked by `run-job`.
  pub engine: CommandConfig,

  /// JSON file listing identity-provider users, for `sync-users`.
  pub idp_users_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandConfig {
  #[serde(default)]
  pub program: Option<String>,
  #[serde(default)]
  pub args:    Vec<String>,
}

fn default_poll_interval_secs() -> u64 { 5 }

pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path.to_path_buf()).required(true))
    .add_source(config::Environment::with_prefix("KINDRED"))
    .build()
    .with_context(|| format!("reading config file {}", path.display()))?;

  settings
    .try_deserialize()
    .context("deserialising worker configuration")
}
