//! Shared helpers for mvmt-ingest integration tests

#![allow(dead_code)]

pub mod log_capture;

pub use log_capture::{capture_logs, LogCapture};

use mvmt_ingest::store::MemoryStore;
use mvmt_ingest::{IngestionWorkflow, SqliteCatalog};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const DATASET: &str = "movements_dataset_v";

/// Sample recording body: header plus two samples
pub const RECORDING: &str = "time,acc_x,acc_y,acc_z\n\
2024-01-15 10:00:00.000,0.1,0.2,9.8\n\
2024-01-15 10:00:00.020,0.1,0.3,9.7\n";

/// Temporary input directory holding `files` with [`RECORDING`] as content
pub fn input_dir(files: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in files {
        std::fs::write(dir.path().join(name), RECORDING).unwrap();
    }
    dir
}

pub fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

/// Workflow over a fresh in-memory store and catalog
pub async fn memory_workflow() -> (IngestionWorkflow, Arc<MemoryStore>, Arc<SqliteCatalog>) {
    let store = Arc::new(MemoryStore::new("memory://movements"));
    let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());
    let workflow = IngestionWorkflow::new(store.clone(), catalog.clone(), DATASET);
    (workflow, store, catalog)
}
