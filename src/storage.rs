use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EtlError;

/// Status returned by a put. The pipeline logs and tolerates non-2xx
/// responses instead of failing the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResponse {
    pub status: u16,
}

impl PutResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Object storage as this pipeline needs it: blocking put, get, and
/// list-by-prefix over `/`-separated keys.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, body: &[u8]) -> Result<PutResponse, EtlError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, EtlError>;
    fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, EtlError>;
}

/// Filesystem mirror of the bucket layout: each key becomes a relative path
/// under the root. Used for local runs and as the target of downloads.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: Utf8PathBuf,
}

impl LocalDirStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalDirStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<PutResponse, EtlError> {
        let path = self.path_for(key);
        write_bytes_atomic(&path, body)?;
        Ok(PutResponse { status: 200 })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        let path = self.path_for(key);
        fs::read(path.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("read {path}: {err}")))
    }

    fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, EtlError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for path in walk_files(self.root.as_std_path())? {
            let relative = path
                .strip_prefix(self.root.as_std_path())
                .map_err(|err| EtlError::Filesystem(err.to_string()))?;
            let key = relative
                .to_str()
                .ok_or_else(|| EtlError::Filesystem(format!("non-utf8 path under {}", self.root)))?
                .to_string();
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        keys.truncate(max_keys);
        Ok(keys)
    }
}

/// Writes through a uniquely named temp file in the target directory, so a
/// put can never stage over a sibling object and an interrupted write leaves
/// no partial object behind.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EtlError> {
    let parent = path
        .parent()
        .ok_or_else(|| EtlError::Filesystem(format!("invalid object path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".outbreak-etl")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Object keys never start with a dot, so hidden files (in-flight or
/// stranded write temps) are not part of the store's contents.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| EtlError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'))
            {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

/// In-memory store backed by a shared map. Clones share contents, so a test
/// can keep a handle and inspect what the pipeline wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<PutResponse, EtlError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
        Ok(PutResponse { status: 200 })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| EtlError::Storage(format!("no such key: {key}")))
    }

    fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, EtlError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .take(max_keys)
            .cloned()
            .collect())
    }
}
