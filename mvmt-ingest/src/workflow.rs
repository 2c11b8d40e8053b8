//! Ingestion workflow
//!
//! One run: list the `.txt` files of a directory, upload every file whose name
//! is not yet in the store, tag each new object with the metadata decoded from
//! its filename, then register the store location as a new dataset version.
//!
//! Per-file failures are logged and recorded in the [`IngestReport`]; they
//! never stop the loop. Only a bad input directory (before any upload) and a
//! failed catalog registration (after the loop) are returned as errors.

use crate::catalog::{Catalog, DatasetKind};
use crate::decoder::decode_path;
use crate::error::{IngestError, IngestResult};
use crate::models::{FileOutcome, FileReport, IngestReport};
use crate::store::{merge_tags, RemoteStore, StoreError, Tags};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upload/tag/register pipeline over one store and one catalog
pub struct IngestionWorkflow {
    store: Arc<dyn RemoteStore>,
    catalog: Arc<dyn Catalog>,
    dataset_name: String,
    max_concurrent: usize,
}

impl IngestionWorkflow {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        catalog: Arc<dyn Catalog>,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            dataset_name: dataset_name.into(),
            max_concurrent: 1,
        }
    }

    /// Number of files processed at once (minimum 1)
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Ingest every `.txt` file directly inside `directory`
    pub async fn run(&self, directory: &Path, author: &str) -> IngestResult<IngestReport> {
        let files = discover(directory).await?;

        info!(
            directory = %directory.display(),
            files = files.len(),
            workers = self.max_concurrent,
            "Starting ingestion"
        );

        let store: &dyn RemoteStore = self.store.as_ref();
        let mut reports: Vec<FileReport> = stream::iter(files)
            .map(|path| process_file(store, path))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        reports.sort_by(|a, b| a.name.cmp(&b.name));

        let location = self.store.location();
        let description = format!("author: {}", author);
        let dataset = self
            .catalog
            .register_dataset(&location, &self.dataset_name, DatasetKind::File, &description)
            .await
            .map_err(IngestError::Catalog)?;

        let report = IngestReport {
            files: reports,
            dataset,
        };

        info!(
            considered = report.considered(),
            uploaded = report.uploaded(),
            tagged = report.tagged(),
            already_remote = report.already_remote(),
            failed = report.failed(),
            dataset = %report.dataset.name,
            version = report.dataset.version,
            "Ingestion complete"
        );

        Ok(report)
    }
}

/// Regular files named `*.txt` directly inside `directory`, sorted by name.
///
/// Symlinks are followed. Subdirectories and other extensions are skipped;
/// the suffix match is case-sensitive.
pub async fn discover(directory: &Path) -> IngestResult<Vec<PathBuf>> {
    match tokio::fs::metadata(directory).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(IngestError::PathNotFound(directory.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(IngestError::PathNotFound(directory.to_path_buf()))
        }
        Err(source) => {
            return Err(IngestError::Io {
                path: directory.to_path_buf(),
                source,
            })
        }
    }

    let io_error = |source| IngestError::Io {
        path: directory.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(io_error)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            debug!(path = %path.display(), "Skipping non UTF-8 filename");
            continue;
        };
        if !name.ends_with(".txt") {
            continue;
        }
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat entry, skipping"),
        }
    }

    files.sort();
    Ok(files)
}

/// Drive one file to a terminal [`FileOutcome`]
async fn process_file(store: &dyn RemoteStore, path: PathBuf) -> FileReport {
    // discover() only yields UTF-8 names
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match store.exists(&name).await {
        Ok(true) => {
            debug!(file = %name, "Already in store, skipping");
            return FileReport::new(name, FileOutcome::AlreadyRemote);
        }
        Ok(false) => {}
        Err(source) => {
            let err = IngestError::Store {
                name: name.clone(),
                source,
            };
            error!(file = %name, error = %err, "Existence check failed");
            return FileReport::with_error(name, FileOutcome::UploadFailed, &err);
        }
    }

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(source) => {
            let err = IngestError::Io { path, source };
            error!(file = %name, error = %err, "Read failed");
            return FileReport::with_error(name, FileOutcome::UploadFailed, &err);
        }
    };

    debug!(file = %name, bytes = data.len(), "Uploading");
    match store.upload(&name, Bytes::from(data)).await {
        Ok(()) => info!(file = %name, "Uploaded"),
        Err(StoreError::AlreadyExists(_)) => {
            // Created by someone else since the existence check
            debug!(file = %name, "Appeared in store during upload, skipping");
            return FileReport::new(name, FileOutcome::AlreadyRemote);
        }
        Err(source) => {
            let err = IngestError::Upload {
                name: name.clone(),
                source,
            };
            error!(file = %name, error = %err, "Upload failed");
            return FileReport::with_error(name, FileOutcome::UploadFailed, &err);
        }
    }

    match tag_object(store, &path, &name).await {
        Ok(tags) => {
            debug!(file = %name, tags = ?tags, "Tagged");
            FileReport::new(name, FileOutcome::Tagged)
        }
        Err(err @ IngestError::Format(_)) => {
            warn!(file = %name, error = %err, "Uploaded without tags");
            FileReport::with_error(name, FileOutcome::TagFailed, &err)
        }
        Err(err) => {
            error!(file = %name, error = %err, "Tag update failed");
            FileReport::with_error(name, FileOutcome::TagFailed, &err)
        }
    }
}

/// Decode the local file's name and merge the result into the tags of object `name`
async fn tag_object(store: &dyn RemoteStore, path: &Path, name: &str) -> IngestResult<Tags> {
    let metadata = decode_path(path)?;
    merge_tags(store, name, metadata.tags())
        .await
        .map_err(|source| IngestError::TagUpdate {
            name: name.to_string(),
            source,
        })
}
