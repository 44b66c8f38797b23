//! In-process [`RemoteStore`] with the same compare-and-swap semantics as the
//! contents API. Version tokens are SHA-256 digests of the content.
//!
//! Besides backing offline dry runs it lets tests script failures and inject
//! a concurrent writer at an exact point in a protocol:
//!
//! ```
//! use charsheet::store::{MemoryStore, StoreError};
//!
//! let store = MemoryStore::new();
//! store.insert("data/characters/index.json", r#"{"characters":[]}"#);
//! store.fail_next_put("data/characters/x.json", StoreError::Unavailable("boom".into()));
//! assert!(store.contains("data/characters/index.json"));
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{RemoteFile, RemoteStore, StoreError};

type Files = BTreeMap<String, String>;
type Hook = Box<dyn FnOnce(&mut Files) + Send>;

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub fetch: usize,
    pub put: usize,
    pub delete: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get + self.fetch + self.put + self.delete
    }
}

#[derive(Default)]
struct Inner {
    files: Files,
    counts: CallCounts,
    puts_by_path: HashMap<String, usize>,
    put_failures: HashMap<String, VecDeque<StoreError>>,
    before_put: HashMap<String, VecDeque<Hook>>,
    history: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

pub fn content_sha(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic in a hook must not wedge every later test assertion.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a file directly, bypassing counters.
    pub fn insert(&self, path: &str, content: &str) {
        self.lock()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.lock().files.remove(path)
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn counts(&self) -> CallCounts {
        self.lock().counts
    }

    /// Number of successful writes to `path`.
    pub fn puts_to(&self, path: &str) -> usize {
        self.lock().puts_by_path.get(path).copied().unwrap_or(0)
    }

    /// Every successful mutation in order, as `"put <path>"` / `"delete <path>"`.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Make the next `put` to `path` fail with `err` before touching anything.
    pub fn fail_next_put(&self, path: &str, err: StoreError) {
        self.lock()
            .put_failures
            .entry(path.to_string())
            .or_default()
            .push_back(err);
    }

    /// Run `hook` against the file map immediately before the next `put` to
    /// `path` is checked. Simulates another client writing in between this
    /// client's read and its write.
    pub fn before_next_put(&self, path: &str, hook: impl FnOnce(&mut Files) + Send + 'static) {
        self.lock()
            .before_put
            .entry(path.to_string())
            .or_default()
            .push_back(Box::new(hook));
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<RemoteFile, StoreError> {
        let mut inner = self.lock();
        inner.counts.get += 1;
        inner
            .files
            .get(path)
            .map(|content| RemoteFile {
                sha: content_sha(content),
                content: content.clone(),
            })
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn fetch(&self, path: &str) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.counts.fetch += 1;
        inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        sha: Option<&str>,
        _message: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.counts.put += 1;

        if let Some(err) = inner.put_failures.get_mut(path).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(hook) = inner.before_put.get_mut(path).and_then(VecDeque::pop_front) {
            hook(&mut inner.files);
        }

        let current = inner.files.get(path).map(|c| content_sha(c));
        match (current.as_deref(), sha) {
            (Some(cur), Some(expected)) if cur != expected => {
                return Err(StoreError::conflict(path))
            }
            (None, Some(_)) => return Err(StoreError::conflict(path)),
            // blind create over an existing file is rejected, as the API does
            (Some(_), None) => return Err(StoreError::conflict(path)),
            _ => {}
        }

        inner.files.insert(path.to_string(), content.to_string());
        *inner.puts_by_path.entry(path.to_string()).or_default() += 1;
        inner.history.push(format!("put {path}"));
        Ok(content_sha(content))
    }

    async fn delete(&self, path: &str, sha: &str, _message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.counts.delete += 1;
        let current = inner
            .files
            .get(path)
            .map(|c| content_sha(c))
            .ok_or_else(|| StoreError::not_found(path))?;
        if current != sha {
            return Err(StoreError::conflict(path));
        }
        inner.files.remove(path);
        inner.history.push(format!("delete {path}"));
        Ok(())
    }
}
