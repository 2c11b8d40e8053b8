//! mvmt-ingest library interface
//!
//! Uploads movement recordings to blob storage, tags them with metadata
//! decoded from their filenames and registers each run as a dataset version.
//! The binary in `main.rs` is a thin CLI over these modules.

pub mod catalog;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod models;
pub mod store;
pub mod workflow;

pub use crate::catalog::{Catalog, DatasetKind, DatasetVersion, SqliteCatalog};
pub use crate::decoder::decode;
pub use crate::error::{CredentialError, FormatError, IngestError, IngestResult};
pub use crate::models::{FileOutcome, FileRecordMetadata, IngestReport};
pub use crate::store::{RemoteStore, StoreError};
pub use crate::workflow::IngestionWorkflow;
