//! Integration tests for `SqliteStore` against an in-memory database.

use kindred_core::{
  cluster::{self, MatchAnalysis, PersonMove, ScoredPair},
  config::{NewMatchConfig, Thresholds},
  job::{Job, JobKind, JobOutcome, JobStatus, NewJob},
  record::{Demographics, NewPersonRecord},
  store::MatchStore,
  user::{NewUser, UserRole},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn thresholds() -> Thresholds {
  Thresholds::new(0.8, 0.95).unwrap()
}

async fn config_id(s: &SqliteStore) -> i64 {
  s.create_config(NewMatchConfig {
    linkage_rules: serde_json::json!({"blocking": ["last_name"]}),
    thresholds:    thresholds(),
  })
  .await
  .unwrap()
  .config_id
}

async fn enqueue_import(s: &SqliteStore) -> Job {
  let config_id = config_id(s).await;
  s.enqueue_job(NewJob {
    kind: JobKind::ImportPersonRecords,
    config_id,
    source_uri: "file://imports/batch-1.csv".into(),
  })
  .await
  .unwrap()
}

fn record(first: &str, last: &str) -> NewPersonRecord {
  NewPersonRecord {
    demographics: Demographics {
      data_source: "clinic-a".into(),
      source_person_id: format!("{first}-{last}"),
      first_name: first.into(),
      last_name: last.into(),
      birth_date: "1990-01-02".into(),
      ..Default::default()
    },
  }
}

fn pair(l: i64, r: i64, p: f64) -> ScoredPair {
  ScoredPair {
    left_record_id:  l,
    right_record_id: r,
    probability:     p,
    match_weight:    10.0,
  }
}

// ─── Configs ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn config_roundtrip() {
  let s = store().await;

  let created = s
    .create_config(NewMatchConfig {
      linkage_rules: serde_json::json!({"comparisons": ["first_name"]}),
      thresholds:    thresholds(),
    })
    .await
    .unwrap();

  let fetched = s.get_config(created.config_id).await.unwrap().unwrap();
  assert_eq!(fetched.linkage_rules, created.linkage_rules);
  assert_eq!(fetched.thresholds.potential_match, 0.8);
  assert_eq!(fetched.thresholds.auto_match, 0.95);
}

#[tokio::test]
async fn invalid_thresholds_rejected() {
  let s = store().await;
  let err = s
    .create_config(NewMatchConfig {
      linkage_rules: serde_json::json!({}),
      thresholds:    Thresholds { potential_match: 0.9, auto_match: 0.5 },
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::InvalidThresholds { .. })
  ));
}

#[tokio::test]
async fn get_config_missing_returns_none() {
  let s = store().await;
  assert!(s.get_config(99).await.unwrap().is_none());
}

// ─── Job queue ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_and_get_job() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  assert_eq!(job.status, JobStatus::New);

  let fetched = s.get_job(job.job_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, JobStatus::New);
  assert_eq!(fetched.kind, JobKind::ImportPersonRecords);
  assert_eq!(fetched.source_uri, "file://imports/batch-1.csv");
  assert!(fetched.reason.is_none());
}

#[tokio::test]
async fn claim_next_takes_oldest_job() {
  let s = store().await;
  let first = enqueue_import(&s).await;
  let _second = enqueue_import(&s).await;

  let claimed = s.claim_next_job().await.unwrap().unwrap();
  assert_eq!(claimed.job_id, first.job_id);
  assert_eq!(claimed.status, JobStatus::Running);

  let persisted = s.get_job(first.job_id).await.unwrap().unwrap();
  assert_eq!(persisted.status, JobStatus::Running);
}

#[tokio::test]
async fn claim_next_on_empty_queue_returns_none() {
  let s = store().await;
  assert!(s.claim_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn one_job_cannot_be_claimed_twice() {
  // Two stores over one database file, so the claimers genuinely contend for
  // the SQLite write lock instead of serializing on a shared connection.
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("kindred.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();
  let job = enqueue_import(&a).await;

  let (first, second) = tokio::join!(a.claim_next_job(), b.claim_next_job());
  let wins = [first.unwrap(), second.unwrap()];
  assert_eq!(wins.iter().flatten().count(), 1);
  assert_eq!(wins.iter().flatten().next().unwrap().job_id, job.job_id);
}

#[tokio::test]
async fn claiming_waits_out_a_concurrent_writer() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("kindred.db");
  let s = SqliteStore::open(&path).await.unwrap();
  let job = enqueue_import(&s).await;

  // Another connection holds the write lock and releases it shortly after;
  // the claim must wait it out rather than fail with SQLITE_BUSY.
  let blocker = rusqlite::Connection::open(&path).unwrap();
  blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
  let release = std::thread::spawn(move || {
    std::thread::sleep(std::time::Duration::from_millis(200));
    blocker.execute_batch("COMMIT").unwrap();
  });

  let claimed = s.claim_next_job().await.unwrap().unwrap();
  assert_eq!(claimed.job_id, job.job_id);
  release.join().unwrap();
}

#[tokio::test]
async fn claim_specific_job() {
  let s = store().await;
  let _first = enqueue_import(&s).await;
  let second = enqueue_import(&s).await;

  let claimed = s.claim_job(second.job_id).await.unwrap();
  assert_eq!(claimed.job_id, second.job_id);
  assert_eq!(claimed.status, JobStatus::Running);
}

#[tokio::test]
async fn claim_running_job_errors() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.claim_job(job.job_id).await.unwrap();

  let err = s.claim_job(job.job_id).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::JobAlreadyRunning(
      _,
      JobStatus::Running
    ))
  ));
}

#[tokio::test]
async fn claim_missing_job_errors() {
  let s = store().await;
  let err = s.claim_job(42).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::JobNotFound(42))
  ));
}

#[tokio::test]
async fn complete_job_failure_stores_reason() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.claim_job(job.job_id).await.unwrap();

  let failed = s
    .complete_job(
      job.job_id,
      JobOutcome::Failed { reason: "linkage process exited with 137".into() },
    )
    .await
    .unwrap();

  assert_eq!(failed.status, JobStatus::Failed);
  assert_eq!(
    failed.reason.as_deref(),
    Some("linkage process exited with 137")
  );
}

#[tokio::test]
async fn terminal_jobs_cannot_be_completed_again() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.claim_job(job.job_id).await.unwrap();
  s.complete_job(job.job_id, JobOutcome::Succeeded).await.unwrap();

  let err = s
    .complete_job(job.job_id, JobOutcome::Succeeded)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::InvalidJobTransition { .. })
  ));
}

#[tokio::test]
async fn new_jobs_cannot_be_completed() {
  let s = store().await;
  let job = enqueue_import(&s).await;

  let err = s
    .complete_job(job.job_id, JobOutcome::Succeeded)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::InvalidJobTransition {
      from: JobStatus::New,
      ..
    })
  ));
}

// ─── Import ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn import_creates_singleton_persons() {
  let s = store().await;
  let job = enqueue_import(&s).await;

  let summary = s
    .import_records(
      job.job_id,
      vec![record("Alice", "Liddell"), record("Bob", "Crane")],
    )
    .await
    .unwrap();
  assert_eq!(summary.loaded, 2);
  assert_eq!(summary.skipped, 0);

  let records = s.all_records().await.unwrap();
  assert_eq!(records.len(), 2);

  let ids: Vec<i64> = records.iter().map(|r| r.record_id).collect();
  let entries = s.crosswalk_for_records(&ids).await.unwrap();
  assert_eq!(entries.len(), 2);
  // Each record got its own fresh person.
  assert_ne!(entries[0].person_id, entries[1].person_id);
  assert!(entries.iter().all(|e| e.person_version == 1));
  assert!(entries.iter().all(|e| e.record_count == 1));

  let person = s.get_person(entries[0].person_id).await.unwrap().unwrap();
  assert_eq!(person.job_id, Some(job.job_id));
  assert!(person.deleted.is_none());
}

#[tokio::test]
async fn import_skips_exact_duplicates() {
  let s = store().await;
  let job = enqueue_import(&s).await;

  s.import_records(job.job_id, vec![record("Alice", "Liddell")])
    .await
    .unwrap();

  // Same demographics again, plus one genuinely new record.
  let summary = s
    .import_records(
      job.job_id,
      vec![record("Alice", "Liddell"), record("Cora", "Doyle")],
    )
    .await
    .unwrap();
  assert_eq!(summary.loaded, 1);
  assert_eq!(summary.skipped, 1);
  assert_eq!(s.all_records().await.unwrap().len(), 2);
}

// ─── Auto-matching ───────────────────────────────────────────────────────────

#[tokio::test]
async fn auto_match_merges_into_one_person() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.import_records(
    job.job_id,
    vec![
      record("Alice", "Liddell"),
      record("Alicia", "Liddell"),
      record("Bob", "Crane"),
    ],
  )
  .await
  .unwrap();

  let ids: Vec<i64> = s
    .all_records()
    .await
    .unwrap()
    .iter()
    .map(|r| r.record_id)
    .collect();
  let entries = s.crosswalk_for_records(&ids).await.unwrap();

  let pairs = vec![pair(ids[0], ids[1], 0.99)];
  let analysis = cluster::analyze(&pairs, &entries, thresholds()).unwrap();
  assert_eq!(analysis.moves.len(), 1);

  s.apply_match_analysis(job.job_id, &pairs, &analysis)
    .await
    .unwrap();

  let after = s.crosswalk_for_records(&ids[..2]).await.unwrap();
  assert_eq!(after[0].person_id, after[1].person_id);
  assert_eq!(after[0].record_count, 2);

  // The surviving person's version advanced; the emptied one is tombstoned
  // but its row remains.
  let survivor = s.get_person(after[0].person_id).await.unwrap().unwrap();
  assert_eq!(survivor.version, 2);
  assert!(survivor.deleted.is_none());

  let loser_id = analysis.moves[0].from_person;
  let loser = s.get_person(loser_id).await.unwrap().unwrap();
  assert_eq!(loser.record_count, 0);
  assert_eq!(loser.version, 2);
  assert!(loser.deleted.is_some());

  // The untouched third record kept its person.
  let third = s.crosswalk_for_records(&ids[2..]).await.unwrap();
  assert_eq!(third[0].person_version, 1);
}

#[tokio::test]
async fn stale_person_version_aborts_apply() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.import_records(
    job.job_id,
    vec![record("Alice", "Liddell"), record("Alicia", "Liddell")],
  )
  .await
  .unwrap();

  let ids: Vec<i64> = s
    .all_records()
    .await
    .unwrap()
    .iter()
    .map(|r| r.record_id)
    .collect();
  let entries = s.crosswalk_for_records(&ids).await.unwrap();

  let group_id = Uuid::new_v4();
  let stale = MatchAnalysis {
    groups: vec![],
    moves:  vec![PersonMove {
      group_id,
      record_id:    ids[0],
      from_person:  entries[0].person_id,
      from_version: 7,
      to_person:    entries[1].person_id,
      to_version:   entries[1].person_version,
    }],
  };

  let err = s
    .apply_match_analysis(job.job_id, &[], &stale)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::PersonVersionConflict { expected: 7, found: 1, .. }
  ));

  // The transaction rolled back: nothing moved.
  let after = s.crosswalk_for_records(&ids).await.unwrap();
  assert_ne!(after[0].person_id, after[1].person_id);
}

// ─── Pending groups & review ─────────────────────────────────────────────────

async fn pending_group_setup(s: &SqliteStore) -> (Job, Vec<i64>, Uuid) {
  let job = enqueue_import(s).await;
  s.import_records(
    job.job_id,
    vec![record("Dana", "Frost"), record("Dana", "Forst")],
  )
  .await
  .unwrap();

  let ids: Vec<i64> = s
    .all_records()
    .await
    .unwrap()
    .iter()
    .map(|r| r.record_id)
    .collect();
  let entries = s.crosswalk_for_records(&ids).await.unwrap();

  let pairs = vec![pair(ids[0], ids[1], 0.85)];
  let analysis = cluster::analyze(&pairs, &entries, thresholds()).unwrap();
  assert!(analysis.moves.is_empty());

  s.apply_match_analysis(job.job_id, &pairs, &analysis)
    .await
    .unwrap();

  (job, ids, analysis.groups[0].group_id)
}

#[tokio::test]
async fn pending_groups_carry_their_scores() {
  let s = store().await;
  let (job, ids, group_id) = pending_group_setup(&s).await;

  let pending = s.pending_match_groups().await.unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].group.group_id, group_id);
  assert_eq!(pending[0].group.job_id, job.job_id);
  assert!(pending[0].group.is_pending());

  assert_eq!(pending[0].scores.len(), 1);
  let score = &pending[0].scores[0];
  assert_eq!(score.left_record_id, ids[0].min(ids[1]));
  assert_eq!(score.right_record_id, ids[0].max(ids[1]));
  assert_eq!(score.probability, 0.85);
}

#[tokio::test]
async fn both_orderings_of_a_pair_collapse_to_one_score() {
  let s = store().await;
  let job = enqueue_import(&s).await;
  s.import_records(
    job.job_id,
    vec![record("Dana", "Frost"), record("Dana", "Forst")],
  )
  .await
  .unwrap();

  let ids: Vec<i64> = s
    .all_records()
    .await
    .unwrap()
    .iter()
    .map(|r| r.record_id)
    .collect();
  let entries = s.crosswalk_for_records(&ids).await.unwrap();

  // The engine is free to score (a, b) and (b, a) separately; the apply must
  // keep the stronger one rather than trip the unique pair index.
  let pairs = vec![pair(ids[0], ids[1], 0.85), pair(ids[1], ids[0], 0.90)];
  let analysis = cluster::analyze(&pairs, &entries, thresholds()).unwrap();

  s.apply_match_analysis(job.job_id, &pairs, &analysis)
    .await
    .unwrap();

  let pending = s.pending_match_groups().await.unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].scores.len(), 1);
  let score = &pending[0].scores[0];
  assert_eq!(score.left_record_id, ids[0].min(ids[1]));
  assert_eq!(score.right_record_id, ids[0].max(ids[1]));
  assert_eq!(score.probability, 0.90);
}

#[tokio::test]
async fn approving_a_group_merges_like_an_auto_match() {
  let s = store().await;
  let (_job, ids, group_id) = pending_group_setup(&s).await;
  let reviewer = s
    .add_user(NewUser { idp_user_id: "idp-1".into(), role: UserRole::Member })
    .await
    .unwrap();

  s.approve_match_group(group_id, reviewer.user_id)
    .await
    .unwrap();

  let after = s.crosswalk_for_records(&ids).await.unwrap();
  assert_eq!(after[0].person_id, after[1].person_id);
  assert_eq!(after[0].record_count, 2);
  assert!(s.pending_match_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn resolving_a_group_twice_errors() {
  let s = store().await;
  let (_job, _ids, group_id) = pending_group_setup(&s).await;
  let reviewer = s
    .add_user(NewUser { idp_user_id: "idp-1".into(), role: UserRole::Member })
    .await
    .unwrap();

  s.approve_match_group(group_id, reviewer.user_id)
    .await
    .unwrap();

  let err = s
    .approve_match_group(group_id, reviewer.user_id)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::AlreadyResolved(_))
  ));

  let err = s
    .reject_match_group(group_id, reviewer.user_id)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::AlreadyResolved(_))
  ));
}

#[tokio::test]
async fn rejecting_a_group_leaves_persons_alone() {
  let s = store().await;
  let (_job, ids, group_id) = pending_group_setup(&s).await;
  let reviewer = s
    .add_user(NewUser { idp_user_id: "idp-1".into(), role: UserRole::Admin })
    .await
    .unwrap();

  s.reject_match_group(group_id, reviewer.user_id)
    .await
    .unwrap();

  assert!(s.pending_match_groups().await.unwrap().is_empty());
  let after = s.crosswalk_for_records(&ids).await.unwrap();
  assert_ne!(after[0].person_id, after[1].person_id);
  assert!(after.iter().all(|e| e.person_version == 1));
}

#[tokio::test]
async fn new_matching_run_supersedes_pending_groups() {
  let s = store().await;
  let (_job, _ids, _group_id) = pending_group_setup(&s).await;
  assert_eq!(s.pending_match_groups().await.unwrap().len(), 1);

  // A later run that produces nothing still retires stale pending groups.
  let rerun = enqueue_import(&s).await;
  s.apply_match_analysis(rerun.job_id, &[], &MatchAnalysis::default())
    .await
    .unwrap();

  assert!(s.pending_match_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn resolving_a_missing_group_errors() {
  let s = store().await;
  let reviewer = s
    .add_user(NewUser { idp_user_id: "idp-1".into(), role: UserRole::Member })
    .await
    .unwrap();

  let err = s
    .approve_match_group(Uuid::new_v4(), reviewer.user_id)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::MatchGroupNotFound(_))
  ));
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_look_up_user() {
  let s = store().await;

  let user = s
    .add_user(NewUser { idp_user_id: "idp-9".into(), role: UserRole::Admin })
    .await
    .unwrap();
  assert_eq!(user.role, UserRole::Admin);

  let fetched = s.get_user_by_idp_id("idp-9").await.unwrap().unwrap();
  assert_eq!(fetched.user_id, user.user_id);

  assert!(s.get_user_by_idp_id("idp-unknown").await.unwrap().is_none());
  assert_eq!(s.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_idp_user_errors() {
  let s = store().await;
  s.add_user(NewUser { idp_user_id: "idp-9".into(), role: UserRole::Member })
    .await
    .unwrap();

  let err = s
    .add_user(NewUser { idp_user_id: "idp-9".into(), role: UserRole::Member })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(kindred_core::Error::UserAlreadyExists(_))
  ));
}
