//! In-memory store.
//!
//! Keeps objects in a map and counts mutating calls so tests can assert how
//! often the workflow touched the store. Failures can be injected per name.

use super::{RemoteStore, StoreError, StoreResult, Tags};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    tags: Tags,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    upload_calls: usize,
    set_tags_calls: usize,
    fail_uploads: HashSet<String>,
    fail_set_tags: HashSet<String>,
}

/// In-process [`RemoteStore`]
#[derive(Debug)]
pub struct MemoryStore {
    location: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Insert an object directly, bypassing create-only checks
    pub fn insert(&self, name: &str, data: impl Into<Bytes>, tags: Tags) {
        self.lock().objects.insert(
            name.to_string(),
            StoredObject {
                data: data.into(),
                tags,
            },
        );
    }

    /// Make every upload of `name` fail
    pub fn fail_uploads_for(&self, name: &str) {
        self.lock().fail_uploads.insert(name.to_string());
    }

    /// Make every `set_tags` on `name` fail
    pub fn fail_set_tags_for(&self, name: &str) {
        self.lock().fail_set_tags.insert(name.to_string());
    }

    /// Number of successful uploads
    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }

    /// Number of successful tag writes
    pub fn set_tags_calls(&self) -> usize {
        self.lock().set_tags_calls
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn data(&self, name: &str) -> Option<Bytes> {
        self.lock().objects.get(name).map(|o| o.data.clone())
    }

    pub fn tags(&self, name: &str) -> Option<Tags> {
        self.lock().objects.get(name).map(|o| o.tags.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock can only come from a test assertion
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.lock().objects.contains_key(name))
    }

    async fn upload(&self, name: &str, data: Bytes) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.fail_uploads.contains(name) {
            return Err(StoreError::Http {
                status: 503,
                body: format!("injected upload failure for {}", name),
            });
        }
        if inner.objects.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        inner.objects.insert(
            name.to_string(),
            StoredObject {
                data,
                tags: Tags::new(),
            },
        );
        inner.upload_calls += 1;
        Ok(())
    }

    async fn get_tags(&self, name: &str) -> StoreResult<Tags> {
        self.lock()
            .objects
            .get(name)
            .map(|o| o.tags.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn set_tags(&self, name: &str, tags: &Tags) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.fail_set_tags.contains(name) {
            return Err(StoreError::Http {
                status: 500,
                body: format!("injected tag failure for {}", name),
            });
        }
        let object = inner
            .objects
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        object.tags = tags.clone();
        inner.set_tags_calls += 1;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<(String, Bytes)>> {
        Ok(self
            .lock()
            .objects
            .iter()
            .map(|(name, o)| (name.clone(), o.data.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_is_create_only() {
        let store = MemoryStore::new("memory://t");
        store.upload("a.txt", Bytes::from_static(b"one")).await.unwrap();

        let err = store
            .upload("a.txt", Bytes::from_static(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.data("a.txt").unwrap(), Bytes::from_static(b"one"));
        assert_eq!(store.upload_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new("memory://t");
        store.fail_uploads_for("bad.txt");
        assert!(store.upload("bad.txt", Bytes::new()).await.is_err());
        assert!(!store.exists("bad.txt").await.unwrap());

        store.upload("ok.txt", Bytes::new()).await.unwrap();
        store.fail_set_tags_for("ok.txt");
        assert!(store.set_tags("ok.txt", &Tags::new()).await.is_err());
        assert_eq!(store.set_tags_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let store = MemoryStore::new("memory://t");
        store.insert("b.txt", "2", Tags::new());
        store.insert("a.txt", "1", Tags::new());

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
