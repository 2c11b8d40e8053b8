//! Local directory store.
//!
//! Layout:
//! ```text
//! {base_path}/
//!   {name}              # object content
//!   .tags/
//!     {name}.json       # tag map as a JSON object
//! ```

use super::{RemoteStore, StoreError, StoreResult, Tags};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const TAGS_DIR: &str = ".tags";

/// Directory-backed [`RemoteStore`]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub async fn open(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(base_path.join(TAGS_DIR)).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.base_path.join(name))
    }

    fn tags_path(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.base_path.join(TAGS_DIR).join(format!("{}.json", name)))
    }

    async fn require_object(&self, name: &str) -> StoreResult<PathBuf> {
        let path = self.object_path(name)?;
        if fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(StoreError::NotFound(name.to_string()))
        }
    }
}

/// Object names are single path components without a leading dot
fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn location(&self) -> String {
        format!("file://{}", self.base_path.display())
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let path = self.object_path(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn upload(&self, name: &str, data: Bytes) -> StoreResult<()> {
        let path = self.object_path(name)?;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let written = async {
            file.write_all(&data).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // Do not leave a truncated object behind; the next run retries it
            let _ = fs::remove_file(&path).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    async fn get_tags(&self, name: &str) -> StoreResult<Tags> {
        self.require_object(name).await?;
        let tags_path = self.tags_path(name)?;
        match fs::read(&tags_path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                StoreError::InvalidResponse(format!("{}: {}", tags_path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Tags::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn set_tags(&self, name: &str, tags: &Tags) -> StoreResult<()> {
        self.require_object(name).await?;
        let tags_path = self.tags_path(name)?;
        let raw = serde_json::to_vec_pretty(tags)
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        // Write then rename so readers never see a half-written tag file
        let tmp_path = tags_path.with_extension("json.tmp");
        fs::write(&tmp_path, raw).await?;
        fs::rename(&tmp_path, &tags_path).await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<(String, Bytes)>> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_name(&name).is_ok() => names.push(name),
                Ok(_) => {}
                Err(raw) => {
                    tracing::warn!(file = ?raw, "Skipping object with non UTF-8 name");
                }
            }
        }
        names.sort();

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let data = fs::read(self.base_path.join(&name)).await?;
            objects.push((name, Bytes::from(data)));
        }
        Ok(objects)
    }
}
