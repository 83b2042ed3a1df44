use crate::error::{RemoteError, RemoteResult};
use crate::storage::{ObjectEntry, ObjectStorage, UploadOptions};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    /// bucket -> path -> bytes
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    /// Paths whose download fails.
    broken: HashSet<String>,
    uploads: usize,
}

/// Object storage kept in memory. Folders are implied by `/` in paths.
#[derive(Clone, Default)]
pub struct MemoryObjectStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly.
    pub fn put(&self, bucket: &str, path: &str, bytes: impl Into<Vec<u8>>) {
        self.inner()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(path.trim_matches('/').to_string(), bytes.into());
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.inner()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(path.trim_matches('/')))
            .cloned()
    }

    /// All object paths in a bucket, sorted.
    pub fn paths(&self, bucket: &str) -> Vec<String> {
        self.inner()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make downloads of `path` fail with a server error.
    pub fn break_download(&self, path: &str) {
        self.inner().broken.insert(path.trim_matches('/').to_string());
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        self.inner().uploads
    }
}

impl ObjectStorage for MemoryObjectStorage {
    async fn list(&self, bucket: &str, prefix: &str) -> RemoteResult<Vec<ObjectEntry>> {
        let inner = self.inner();
        let Some(objects) = inner.buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let prefix = prefix.trim_matches('/');
        let lead = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let mut folders = BTreeSet::new();
        let mut files = Vec::new();
        for (path, bytes) in objects.range(lead.clone()..) {
            let Some(rest) = path.strip_prefix(&lead) else {
                break;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                }
                None => files.push(ObjectEntry::file(rest, bytes.len() as u64)),
            }
        }

        let mut entries: Vec<ObjectEntry> = folders.into_iter().map(ObjectEntry::folder).collect();
        entries.extend(files);
        Ok(entries)
    }

    async fn download(&self, bucket: &str, path: &str) -> RemoteResult<Vec<u8>> {
        let path = path.trim_matches('/');
        if self.inner().broken.contains(path) {
            return Err(RemoteError::Http {
                status: 500,
                body: format!("failed to read {}", path),
            });
        }
        self.get(bucket, path).ok_or_else(|| RemoteError::Http {
            status: 404,
            body: format!(r#"{{"error":"not_found","message":"Object not found: {}"}}"#, path),
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> RemoteResult<()> {
        let mut inner = self.inner();
        let objects = inner.buckets.entry(bucket.to_string()).or_default();
        let path = path.trim_matches('/').to_string();
        if !options.overwrite && objects.contains_key(&path) {
            return Err(RemoteError::Http {
                status: 409,
                body: r#"{"error":"Duplicate","message":"The resource already exists"}"#.to_string(),
            });
        }
        objects.insert(path, bytes);
        inner.uploads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[tokio::test]
    async fn test_list_returns_direct_children() {
        let storage = MemoryObjectStorage::new();
        storage.put("media", "root.jpg", vec![1]);
        storage.put("media", "players/7/a.jpg", vec![1, 2]);
        storage.put("media", "players/7/b.jpg", vec![1]);
        storage.put("media", "players/8/c.jpg", vec![1]);
        storage.put("media", "playersX.jpg", vec![1]);

        let root = storage.list("media", "").await.unwrap();
        assert_eq!(
            root,
            vec![
                ObjectEntry::folder("players"),
                ObjectEntry::file("playersX.jpg", 1),
                ObjectEntry::file("root.jpg", 1),
            ]
        );

        let players = storage.list("media", "players").await.unwrap();
        assert_eq!(players, vec![ObjectEntry::folder("7"), ObjectEntry::folder("8")]);

        let seven = storage.list("media", "players/7/").await.unwrap();
        assert_eq!(
            seven,
            vec![ObjectEntry::file("a.jpg", 2), ObjectEntry::file("b.jpg", 1)]
        );
    }

    #[tokio::test]
    async fn test_upload_conflict_unless_overwrite() {
        let storage = MemoryObjectStorage::new();
        storage
            .upload("media", "a.jpg", vec![1], &UploadOptions::default())
            .await
            .unwrap();
        let err = storage
            .upload("media", "a.jpg", vec![2], &UploadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);

        storage
            .upload("media", "a.jpg", vec![3], &UploadOptions::overwrite(true))
            .await
            .unwrap();
        assert_eq!(storage.get("media", "a.jpg"), Some(vec![3]));
        assert_eq!(storage.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_download_missing_and_broken() {
        let storage = MemoryObjectStorage::new();
        storage.put("media", "a.jpg", vec![1]);
        storage.break_download("a.jpg");
        assert!(storage.download("media", "a.jpg").await.unwrap_err().is_transient());
        assert_eq!(
            storage.download("media", "b.jpg").await.unwrap_err().status(),
            Some(404)
        );
    }
}
