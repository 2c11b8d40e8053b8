//! Remote blob store abstraction.
//!
//! Objects are addressed by bare filename inside one container and carry a
//! string tag map. Three backends:
//! - [`AzureBlobStore`]: Azure Blob REST API (SharedKey or SAS)
//! - [`LocalStore`]: a directory on disk, tags in sidecar JSON files
//! - [`MemoryStore`]: in-process, used by tests
//!
//! Uploads are create-only: uploading a name that already exists fails with
//! [`StoreError::AlreadyExists`] and leaves the stored object unchanged.

mod azure;
mod local;
mod memory;

pub use azure::{AzureBlobStore, BlobAuth};
pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::credentials::{ConnectionString, CredentialProvider};
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use bytes::Bytes;
use mvmt_common::IngestConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Tag map attached to a stored object
pub type Tags = BTreeMap<String, String>;

/// Storage error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Create-only upload hit an existing object
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Name cannot be used as an object name
    #[error("Invalid object name: {0}")]
    InvalidName(String),

    /// Service answered with an unexpected status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed response or sidecar data
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Blob-style object storage addressed by name
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Logical location of the container, registered with the catalog.
    /// Never includes credentials.
    fn location(&self) -> String;

    /// Whether an object with this name exists
    async fn exists(&self, name: &str) -> StoreResult<bool>;

    /// Create an object; fails with `AlreadyExists` if the name is taken
    async fn upload(&self, name: &str, data: Bytes) -> StoreResult<()>;

    /// Current tags of an object
    async fn get_tags(&self, name: &str) -> StoreResult<Tags>;

    /// Replace the tags of an object
    async fn set_tags(&self, name: &str, tags: &Tags) -> StoreResult<()>;

    /// All objects with their content, sorted by name
    async fn list(&self) -> StoreResult<Vec<(String, Bytes)>>;
}

/// Merge `new_tags` into the object's existing tags and persist the result.
///
/// Existing keys not in `new_tags` are kept; keys present in both take the
/// new value. Returns the merged set.
pub async fn merge_tags(store: &dyn RemoteStore, name: &str, new_tags: Tags) -> StoreResult<Tags> {
    let mut tags = store.get_tags(name).await?;
    tags.extend(new_tags);
    store.set_tags(name, &tags).await?;
    Ok(tags)
}

/// Which container a command works against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDomain {
    /// Raw recordings uploaded by `ingest`
    RawData,
    /// Computed feature sets
    FeatureSets,
}

/// Connect to the Azure container for a data domain.
///
/// A configured SAS URL is used as-is. Otherwise raw data falls back to a
/// connection string (configured, or fetched through `provider`) for the
/// configured container. Feature sets are only reachable through their SAS
/// URL. Credential failures are fatal and happen before any I/O on objects.
pub async fn connect_azure(
    config: &IngestConfig,
    domain: DataDomain,
    provider: &dyn CredentialProvider,
) -> IngestResult<Arc<dyn RemoteStore>> {
    let sas_url = match domain {
        DataDomain::RawData => config.raw_data_sas_url.as_deref(),
        DataDomain::FeatureSets => config.feature_sets_sas_url.as_deref(),
    };

    if let Some(url) = sas_url {
        tracing::debug!(domain = ?domain, "Using configured SAS URL");
        let store = AzureBlobStore::from_sas_url(url)?;
        return Ok(Arc::new(store));
    }

    if domain == DataDomain::FeatureSets {
        return Err(IngestError::Configuration(format!(
            "{} is required to access feature sets",
            mvmt_common::config::env_keys::FEATURE_SETS_SAS_URL
        )));
    }

    let raw = match &config.connection_string {
        Some(cs) => {
            tracing::debug!("Using configured connection string");
            cs.clone()
        }
        None => {
            provider
                .get_connection_string(&config.storage_account, &config.resource_group)
                .await?
        }
    };

    let connection_string = ConnectionString::parse(&raw)?;
    let store = AzureBlobStore::from_connection_string(&connection_string, &config.container)?;
    Ok(Arc::new(store))
}
