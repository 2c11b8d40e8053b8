//! Dataset catalog
//!
//! Each ingestion run registers the store location as a new version of a named
//! dataset. Versions start at 1 and increase by one per registration of the
//! same name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mvmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// What a dataset path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    File,
    Folder,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::File => "file",
            DatasetKind::Folder => "folder",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(DatasetKind::File),
            "folder" => Ok(DatasetKind::Folder),
            other => Err(Error::InvalidInput(format!("Unknown dataset kind: {}", other))),
        }
    }
}

/// One registered version of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub name: String,
    pub version: i64,
    pub path: String,
    pub kind: DatasetKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Dataset registry
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Register `path` as the next version of `name`
    async fn register_dataset(
        &self,
        path: &str,
        name: &str,
        kind: DatasetKind,
        description: &str,
    ) -> Result<DatasetVersion>;

    /// All versions of `name`, oldest first
    async fn versions(&self, name: &str) -> Result<Vec<DatasetVersion>>;
}

/// SQLite-backed [`Catalog`]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (or create) the catalog database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %db_path.display(), "Opened dataset catalog");
        Self::with_pool(pool).await
    }

    /// Private in-memory catalog (tests, dry runs)
    pub async fn in_memory() -> Result<Self> {
        // One connection: every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        create_dataset_versions_table(&pool).await?;
        Ok(Self { pool })
    }
}

async fn create_dataset_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_versions (
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            path TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (name, version)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn register_dataset(
        &self,
        path: &str,
        name: &str,
        kind: DatasetKind,
        description: &str,
    ) -> Result<DatasetVersion> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Dataset name is empty".to_string()));
        }

        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM dataset_versions WHERE name = ?")
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
        let version = current.unwrap_or(0) + 1;

        sqlx::query(
            r#"
            INSERT INTO dataset_versions (name, version, path, kind, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(version)
        .bind(path)
        .bind(kind.as_str())
        .bind(description)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(dataset = %name, version, path = %path, "Registered dataset version");

        Ok(DatasetVersion {
            name: name.to_string(),
            version,
            path: path.to_string(),
            kind,
            description: description.to_string(),
            created_at,
        })
    }

    async fn versions(&self, name: &str) -> Result<Vec<DatasetVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT name, version, path, kind, description, created_at
            FROM dataset_versions
            WHERE name = ?
            ORDER BY version
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.get("kind");
                let created_at: String = row.get("created_at");
                Ok(DatasetVersion {
                    name: row.get("name"),
                    version: row.get("version"),
                    path: row.get("path"),
                    kind: kind.parse()?,
                    description: row.get("description"),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| Error::Internal(format!("Bad created_at '{}': {}", created_at, e)))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}
