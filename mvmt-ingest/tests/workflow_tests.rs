//! Ingestion workflow integration tests
//!
//! Runs whole ingestion passes against in-memory and on-disk stores.

mod helpers;

use helpers::*;
use mvmt_ingest::catalog::Catalog;
use mvmt_ingest::store::{LocalStore, MemoryStore, RemoteStore};
use mvmt_ingest::{FileOutcome, IngestError, IngestionWorkflow, SqliteCatalog};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::Level;

const ANNA: &str = "20240115_1_0_Anna_07.txt";
const BEN: &str = "20240116_3_1_Ben_2.txt";
const CEM: &str = "20240117_4_0_Cem_11.txt";

#[tokio::test]
async fn test_uploads_and_tags_new_files() {
    let dir = input_dir(&[ANNA, BEN]);
    let (workflow, store, _catalog) = memory_workflow().await;

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.considered(), 2);
    assert_eq!(report.tagged(), 2);
    assert_eq!(store.upload_calls(), 2);
    assert_eq!(store.data(ANNA).unwrap(), RECORDING.as_bytes());

    let tags = store.tags(ANNA).unwrap();
    assert_eq!(tags["date"], "20240115");
    assert_eq!(tags["exercise"], "Squat");
    assert_eq!(tags["position"], "Pocket");
    assert_eq!(tags["name"], "Anna");
    assert_eq!(tags["daily_count"], "07");

    assert_eq!(store.tags(BEN).unwrap()["exercise"], "Bizeps Curl");
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = input_dir(&[ANNA, BEN]);
    let (workflow, store, catalog) = memory_workflow().await;

    workflow.run(dir.path(), "ann").await.unwrap();
    let second = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(second.already_remote(), 2);
    assert_eq!(second.uploaded(), 0);
    assert_eq!(store.upload_calls(), 2);
    assert_eq!(store.set_tags_calls(), 2);

    // Registration happens on every run, even with nothing new
    let versions = catalog.versions(DATASET).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(second.dataset.version, 2);
}

#[tokio::test]
async fn test_existing_object_is_left_untouched() {
    let dir = input_dir(&[ANNA]);
    let (workflow, store, _catalog) = memory_workflow().await;
    let mut tags = mvmt_ingest::store::Tags::new();
    tags.insert("owner".into(), "lab".into());
    store.insert(ANNA, "older content", tags.clone());

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.outcome_of(ANNA), Some(FileOutcome::AlreadyRemote));
    assert_eq!(store.data(ANNA).unwrap(), "older content".as_bytes());
    assert_eq!(store.tags(ANNA).unwrap(), tags);
}

#[tokio::test]
async fn test_undecodable_name_is_uploaded_untagged() {
    let dir = input_dir(&[ANNA, "not_a_valid_name.txt"]);
    let (workflow, store, _catalog) = memory_workflow().await;
    let (logs, _guard) = capture_logs();

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.outcome_of(ANNA), Some(FileOutcome::Tagged));
    assert_eq!(
        report.outcome_of("not_a_valid_name.txt"),
        Some(FileOutcome::TagFailed)
    );
    assert_eq!(store.upload_calls(), 2);
    assert!(store.tags("not_a_valid_name.txt").unwrap().is_empty());

    let warnings = logs.for_file(Level::WARN, "not_a_valid_name.txt");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].field("error").unwrap().contains("does not match expected format"));
}

#[tokio::test]
async fn test_only_txt_files_are_considered() {
    let dir = input_dir(&["a.txt", "a.csv"]);
    std::fs::create_dir(dir.path().join("b")).unwrap();
    write_file(&dir.path().join("b"), BEN, RECORDING);
    let (workflow, store, _catalog) = memory_workflow().await;

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.considered(), 1);
    assert_eq!(report.files[0].name, "a.txt");
    assert_eq!(store.names(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_upload_failure_does_not_stop_the_run() {
    let dir = input_dir(&[ANNA, BEN, CEM]);
    let (workflow, store, _catalog) = memory_workflow().await;
    store.fail_uploads_for(BEN);
    let (logs, _guard) = capture_logs();

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.outcome_of(BEN), Some(FileOutcome::UploadFailed));
    assert_eq!(report.tagged(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!store.names().contains(&BEN.to_string()));
    assert_eq!(logs.for_file(Level::ERROR, BEN).len(), 1);

    let failed = report.files.iter().find(|f| f.name == BEN).unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("UPLOAD_ERROR"));
}

#[tokio::test]
async fn test_failed_upload_is_retried_next_run() {
    let dir = input_dir(&[ANNA]);
    let store = Arc::new(MemoryStore::new("memory://movements"));
    let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());

    store.fail_uploads_for(ANNA);
    let failing = IngestionWorkflow::new(store.clone(), catalog.clone(), DATASET);
    let first = failing.run(dir.path(), "ann").await.unwrap();
    assert_eq!(first.outcome_of(ANNA), Some(FileOutcome::UploadFailed));

    // A healthy store with the same (empty) contents picks the file up
    let healthy = Arc::new(MemoryStore::new("memory://movements"));
    let workflow = IngestionWorkflow::new(healthy.clone(), catalog, DATASET);
    let second = workflow.run(dir.path(), "ann").await.unwrap();
    assert_eq!(second.outcome_of(ANNA), Some(FileOutcome::Tagged));
    assert_eq!(healthy.tags(ANNA).unwrap()["name"], "Anna");
}

#[tokio::test]
async fn test_tag_failure_keeps_upload() {
    let dir = input_dir(&[ANNA, BEN]);
    let (workflow, store, _catalog) = memory_workflow().await;
    store.fail_set_tags_for(ANNA);

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.outcome_of(ANNA), Some(FileOutcome::TagFailed));
    assert_eq!(report.outcome_of(BEN), Some(FileOutcome::Tagged));
    assert!(store.data(ANNA).is_some());
    assert!(store.tags(ANNA).unwrap().is_empty());

    let failed = report.files.iter().find(|f| f.name == ANNA).unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("TAG_UPDATE_ERROR"));
}

#[tokio::test]
async fn test_catalog_registered_once_per_run() {
    let dir = input_dir(&[]);
    let (workflow, _store, catalog) = memory_workflow().await;

    let report = workflow.run(dir.path(), "bo").await.unwrap();

    assert_eq!(report.considered(), 0);
    let versions = catalog.versions(DATASET).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].path, "memory://movements");
    assert_eq!(versions[0].description, "author: bo");
}

#[tokio::test]
async fn test_missing_directory_is_fatal_and_registers_nothing() {
    let parent = TempDir::new().unwrap();
    let (workflow, store, catalog) = memory_workflow().await;

    let err = workflow
        .run(&parent.path().join("absent"), "ann")
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::PathNotFound(_)));
    assert!(err.is_fatal());
    assert_eq!(store.upload_calls(), 0);
    assert!(catalog.versions(DATASET).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_run_matches_sequential() {
    let names: Vec<String> = (1..=12)
        .map(|i| format!("20240115_{}_{}_Subj_{:02}.txt", i % 5, i % 2, i))
        .collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dir = input_dir(&refs);

    let store = Arc::new(MemoryStore::new("memory://movements"));
    let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());
    let workflow =
        IngestionWorkflow::new(store.clone(), catalog, DATASET).with_max_concurrent(4);

    let report = workflow.run(dir.path(), "ann").await.unwrap();

    assert_eq!(report.tagged(), 12);
    assert_eq!(store.upload_calls(), 12);
    let reported: Vec<&str> = report.files.iter().map(|f| f.name.as_str()).collect();
    let mut sorted = refs.clone();
    sorted.sort();
    assert_eq!(reported, sorted);
}

#[tokio::test]
async fn test_local_store_end_to_end() {
    let input = input_dir(&[ANNA, "readme.txt"]);
    let store_dir = TempDir::new().unwrap();
    let catalog_dir = TempDir::new().unwrap();

    let store = Arc::new(LocalStore::open(store_dir.path()).await.unwrap());
    let catalog = Arc::new(
        SqliteCatalog::open(&catalog_dir.path().join("catalog.db"))
            .await
            .unwrap(),
    );
    let workflow = IngestionWorkflow::new(store.clone(), catalog, DATASET);

    let report = workflow.run(input.path(), "ann").await.unwrap();

    assert_eq!(report.tagged(), 1);
    assert_eq!(report.outcome_of("readme.txt"), Some(FileOutcome::TagFailed));
    assert_eq!(
        std::fs::read_to_string(store_dir.path().join(ANNA)).unwrap(),
        RECORDING
    );
    assert_eq!(store.get_tags(ANNA).await.unwrap()["exercise"], "Squat");
    assert!(report.dataset.path.starts_with("file://"));

    let again = workflow.run(input.path(), "ann").await.unwrap();
    assert_eq!(again.already_remote(), 2);
    assert_eq!(again.dataset.version, 2);
}

#[tokio::test]
async fn test_report_serializes_outcomes() {
    let dir = input_dir(&[ANNA]);
    let (workflow, _store, _catalog) = memory_workflow().await;

    let report = workflow.run(dir.path(), "ann").await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["files"][0]["outcome"], "TAGGED");
    assert_eq!(json["dataset"]["kind"], "file");
    assert_eq!(json["dataset"]["name"], DATASET);
}
