//! `kindred-worker` — the matching worker and its operator CLI.
//!
//! The `worker` subcommand runs the control loop: claim a job, execute it in
//! a child process, record the outcome, repeat. The child re-enters this same
//! binary through the `run-job` subcommand, which runs the matching pipeline
//! for one already-claimed job. The remaining subcommands are operator tools
//! for configs, the job queue, match review, and users.

mod idp;
mod object_store;
mod settings;

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use kindred_core::{
  config::{NewMatchConfig, Thresholds},
  ids::{self, ObjectKind},
  job::{JobKind, NewJob},
  store::MatchStore,
  user::{IdentityProvider, NewUser, UserRole},
};
use kindred_match::{
  engine::CommandEngine,
  matcher::Matcher,
  runner::JobRunner,
  service::{MatchingService, Tick},
};
use kindred_store_sqlite::SqliteStore;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::{
  idp::FileIdentityProvider,
  object_store::FsObjectStore,
  settings::AppConfig,
};

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Kindred matching worker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the worker loop, polling the job queue until interrupted.
  Worker,

  /// Execute the matching pipeline for one claimed job. Spawned by the
  /// worker loop; not intended for interactive use.
  RunJob {
    job_id: i64,
  },

  /// Create an immutable matching configuration from a linkage-rules file.
  CreateConfig {
    /// Path to the linkage rules, as JSON.
    rules: PathBuf,
    /// Probability at or above which a pair is queued for review.
    #[arg(long)]
    potential: f64,
    /// Probability at or above which a pair merges automatically.
    #[arg(long)]
    auto: f64,
  },

  /// Queue an import of person records from an object-store URI.
  EnqueueImport {
    /// Source URI, e.g. `file://imports/batch-1.csv`.
    source_uri: String,
    /// Config id, e.g. `cfg_1`.
    #[arg(long)]
    config: String,
  },

  /// Queue an export of pending potential matches to an object-store URI.
  EnqueueExport {
    /// Destination URI, e.g. `file://exports/pending.csv`.
    dest_uri: String,
    /// Config id, e.g. `cfg_1`.
    #[arg(long)]
    config: String,
  },

  /// List pending potential-match groups and their pair scores.
  Pending,

  /// Approve a pending group, merging its records.
  Approve {
    /// Group id, e.g. `pm_<uuid>`.
    group: String,
    /// Identity-provider user id of the reviewer.
    #[arg(long)]
    user: String,
  },

  /// Reject a pending group, leaving its persons untouched.
  Reject {
    /// Group id, e.g. `pm_<uuid>`.
    group: String,
    /// Identity-provider user id of the reviewer.
    #[arg(long)]
    user: String,
  },

  /// Register a user for audit attribution.
  AddUser {
    /// The identity provider's id for this user.
    idp_user_id: String,
    #[arg(long, default_value = "member")]
    role: RoleArg,
  },

  /// Pull the user list from the identity provider and register anyone new.
  SyncUsers,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
  Admin,
  Member,
}

impl From<RoleArg> for UserRole {
  fn from(role: RoleArg) -> Self {
    match role {
      RoleArg::Admin => UserRole::Admin,
      RoleArg::Member => UserRole::Member,
    }
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let app = settings::load(&cli.config)?;

  let store_path = expand_tilde(&app.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("opening store at {store_path:?}"))?;

  match cli.command {
    Command::Worker => run_worker(&cli.config, &app, store).await,
    Command::RunJob { job_id } => run_job(&app, store, job_id).await,
    Command::CreateConfig { rules, potential, auto } => {
      create_config(store, &rules, potential, auto).await
    }
    Command::EnqueueImport { source_uri, config } => {
      enqueue(store, JobKind::ImportPersonRecords, source_uri, &config).await
    }
    Command::EnqueueExport { dest_uri, config } => {
      enqueue(store, JobKind::ExportPotentialMatches, dest_uri, &config).await
    }
    Command::Pending => list_pending(store).await,
    Command::Approve { group, user } => {
      resolve_group(store, &group, &user, true).await
    }
    Command::Reject { group, user } => {
      resolve_group(store, &group, &user, false).await
    }
    Command::AddUser { idp_user_id, role } => {
      let user = store
        .add_user(NewUser { idp_user_id, role: role.into() })
        .await?;
      println!("added user {} ({:?})", user.idp_user_id, user.role);
      Ok(())
    }
    Command::SyncUsers => sync_users(&app, store).await,
  }
}

// ─── Worker loop ─────────────────────────────────────────────────────────────

async fn run_worker(
  config_path: &Path,
  config: &AppConfig,
  store: SqliteStore,
) -> anyhow::Result<()> {
  let runner = build_runner(config_path, config)?;
  let service = MatchingService::new(store, runner);
  let idle = Duration::from_secs(config.poll_interval_secs);

  info!(poll_interval_secs = config.poll_interval_secs, "worker started");

  loop {
    match service.run_next_job().await? {
      Tick::Completed(job) => {
        info!(job_id = job.job_id, status = %job.status, "tick completed");
      }
      Tick::Idle => {
        tokio::select! {
          _ = tokio::time::sleep(idle) => {}
          _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            return Ok(());
          }
        }
      }
    }
  }
}

/// The command the runner spawns per job. Defaults to re-invoking this binary
/// as `kindred-worker --config <path> run-job`; the runner appends the job id.
fn build_runner(
  config_path: &Path,
  config: &AppConfig,
) -> anyhow::Result<JobRunner> {
  if let Some(program) = &config.runner.program {
    return Ok(JobRunner::new(program.as_str(), config.runner.args.clone()));
  }

  let exe = std::env::current_exe().context("resolving worker executable")?;
  Ok(JobRunner::new(exe.to_string_lossy(), [
    "--config".to_owned(),
    config_path.to_string_lossy().into_owned(),
    "run-job".to_owned(),
  ]))
}

// ─── Child entry ─────────────────────────────────────────────────────────────

async fn run_job(
  config: &AppConfig,
  store: SqliteStore,
  job_id: i64,
) -> anyhow::Result<()> {
  let program = config
    .engine
    .program
    .as_deref()
    .context("config is missing `engine.program`")?;
  let engine = CommandEngine::new(program, config.engine.args.clone());
  let objects = FsObjectStore::new(expand_tilde(&config.object_root));

  let matcher = Matcher::new(store, objects, engine);
  matcher.run(job_id).await?;
  Ok(())
}

// ─── Operator commands ───────────────────────────────────────────────────────

async fn create_config(
  store: SqliteStore,
  rules_path: &Path,
  potential: f64,
  auto: f64,
) -> anyhow::Result<()> {
  let raw = std::fs::read_to_string(rules_path)
    .with_context(|| format!("reading {}", rules_path.display()))?;
  let linkage_rules = serde_json::from_str(&raw).context("parsing rules")?;
  let thresholds = Thresholds::new(potential, auto)?;

  let config = store
    .create_config(NewMatchConfig { linkage_rules, thresholds })
    .await?;
  println!("{}", ids::render_int(ObjectKind::Config, config.config_id));
  Ok(())
}

async fn enqueue(
  store: SqliteStore,
  kind: JobKind,
  source_uri: String,
  config: &str,
) -> anyhow::Result<()> {
  let config_id = ids::parse_int(ObjectKind::Config, config)?;
  let job = store
    .enqueue_job(NewJob { kind, config_id, source_uri })
    .await?;
  println!("{}", ids::render_int(ObjectKind::Job, job.job_id));
  Ok(())
}

async fn list_pending(store: SqliteStore) -> anyhow::Result<()> {
  let pending = store.pending_match_groups().await?;
  if pending.is_empty() {
    println!("no pending matches");
    return Ok(());
  }

  for potential in pending {
    println!(
      "{} (created {})",
      ids::render_uuid(ObjectKind::PotentialMatch, potential.group.group_id),
      potential.group.created.to_rfc3339(),
    );
    for score in potential.scores {
      println!(
        "  {} <-> {}  probability {:.4}  weight {:.2}",
        ids::render_int(ObjectKind::PersonRecord, score.left_record_id),
        ids::render_int(ObjectKind::PersonRecord, score.right_record_id),
        score.probability,
        score.match_weight,
      );
    }
  }
  Ok(())
}

async fn resolve_group(
  store: SqliteStore,
  group: &str,
  idp_user_id: &str,
  approve: bool,
) -> anyhow::Result<()> {
  let group_id = ids::parse_uuid(ObjectKind::PotentialMatch, group)?;
  let user = store
    .get_user_by_idp_id(idp_user_id)
    .await?
    .ok_or_else(|| kindred_core::Error::UserNotFound(idp_user_id.to_owned()))?;

  if approve {
    store.approve_match_group(group_id, user.user_id).await?;
    println!("approved {group}");
  } else {
    store.reject_match_group(group_id, user.user_id).await?;
    println!("rejected {group}");
  }
  Ok(())
}

async fn sync_users(
  config: &AppConfig,
  store: SqliteStore,
) -> anyhow::Result<()> {
  let path = config
    .idp_users_file
    .as_deref()
    .context("config is missing `idp_users_file`")?;
  let provider = FileIdentityProvider::new(path);

  let mut added = 0usize;
  for idp_user in provider.get_users().await? {
    if store.get_user_by_idp_id(&idp_user.id).await?.is_some() {
      continue;
    }
    store
      .add_user(NewUser {
        idp_user_id: idp_user.id.clone(),
        role:        UserRole::Member,
      })
      .await?;
    info!(idp_user_id = idp_user.id, email = idp_user.email, "user added");
    added += 1;
  }

  println!("synced users, {added} added");
  Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
