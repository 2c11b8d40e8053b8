//! Error types for mvmt-ingest
//!
//! Fatal errors (configuration, local path, credentials) abort a run before
//! anything is uploaded. Every other variant is caught per file, logged and
//! recorded in the run report.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// A filename that does not follow `YYYYMMDD_E_P_NAME_COUNT.txt`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Filename '{filename}' does not match expected format")]
pub struct FormatError {
    pub filename: String,
}

/// Connection string could not be obtained or understood
#[derive(Debug, Error)]
pub enum CredentialError {
    /// `az` could not be started at all
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// `az` exited with a non-zero status
    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Output was not a JSON string
    #[error("Malformed credential output: {0}")]
    Malformed(String),

    /// Lookup succeeded but produced nothing usable
    #[error("Could not retrieve the connection string for storage account '{0}'")]
    Empty(String),

    /// Connection string or SAS URL is missing required parts
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
}

/// Ingestion error taxonomy
#[derive(Debug, Error)]
pub enum IngestError {
    /// Required setting missing or invalid (fatal)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input directory does not exist or is not a directory (fatal)
    #[error("Path not found or not a directory: {0}")]
    PathNotFound(PathBuf),

    /// Remote store credentials unavailable (fatal)
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Filename does not decode; tagging skipped
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Tags could not be read or written; object stays with old tags
    #[error("Tag update failed for '{name}': {source}")]
    TagUpdate {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Upload failed; object is absent and will be retried next run
    #[error("Upload failed for '{name}': {source}")]
    Upload {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Remote store query failed (existence check, listing)
    #[error("Remote store error for '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Dataset registration failed
    #[error("Catalog error: {0}")]
    Catalog(#[source] mvmt_common::Error),

    /// Local filesystem error
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// Fatal errors abort the whole run; the rest are handled per file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Configuration(_) | IngestError::PathNotFound(_) | IngestError::Credential(_)
        )
    }

    /// Short stable code for reports
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Configuration(_) => "CONFIGURATION_ERROR",
            IngestError::PathNotFound(_) => "PATH_NOT_FOUND",
            IngestError::Credential(_) => "CREDENTIAL_ERROR",
            IngestError::Format(_) => "FORMAT_ERROR",
            IngestError::TagUpdate { .. } => "TAG_UPDATE_ERROR",
            IngestError::Upload { .. } => "UPLOAD_ERROR",
            IngestError::Store { .. } => "STORE_ERROR",
            IngestError::Catalog(_) => "CATALOG_ERROR",
            IngestError::Io { .. } => "IO_ERROR",
        }
    }
}

impl From<mvmt_common::Error> for IngestError {
    fn from(err: mvmt_common::Error) -> Self {
        match err {
            mvmt_common::Error::Config(msg) => IngestError::Configuration(msg),
            other => IngestError::Catalog(other),
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(IngestError::Configuration("x".into()).is_fatal());
        assert!(IngestError::PathNotFound(PathBuf::from("/x")).is_fatal());
        assert!(IngestError::Credential(CredentialError::Empty("acct".into())).is_fatal());

        assert!(!IngestError::Format(FormatError {
            filename: "a.txt".into()
        })
        .is_fatal());
        assert!(!IngestError::Upload {
            name: "a.txt".into(),
            source: StoreError::AlreadyExists("a.txt".into()),
        }
        .is_fatal());
    }

    #[test]
    fn test_common_config_error_maps_to_configuration() {
        let err: IngestError = mvmt_common::Error::Config("missing".into()).into();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_format_error_message_carries_filename() {
        let err = FormatError {
            filename: "bad.txt".into(),
        };
        assert!(err.to_string().contains("bad.txt"));
    }
}
