//! # Remote File Store
//!
//! Single-file access to a version-controlled store. Every file has an opaque
//! version token (the Git blob `sha`); writes and deletes can be made
//! conditional on it, which is the only concurrency control the store offers.
//! There are no multi-file transactions and no locks.
//!
//! ## Read paths
//!
//! - [`RemoteStore::get`] - authoritative read, returns content plus version token
//! - [`RemoteStore::fetch`] - fast read for display and loading; may be stale, no token
//!
//! ## Write paths
//!
//! - [`RemoteStore::put`] - create (no token) or compare-and-swap update (token)
//! - [`RemoteStore::delete`] - compare-and-swap delete
//!
//! Implementations:
//!
//! - [`github::GitHubStore`] - the GitHub REST contents API
//! - [`memory::MemoryStore`] - in-process store used by tests and dry runs

pub mod github;
pub mod memory;

use async_trait::async_trait;

pub use github::GitHubStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{path} not found")]
    NotFound { path: String },

    #[error("{path} was changed by someone else (version mismatch)")]
    Conflict { path: String },

    #[error("missing or invalid write credential")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(path: &str) -> Self {
        StoreError::NotFound {
            path: path.to_string(),
        }
    }

    pub fn conflict(path: &str) -> Self {
        StoreError::Conflict {
            path: path.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A file as returned by an authoritative read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Authoritative read. Never cached.
    async fn get(&self, path: &str) -> Result<RemoteFile, StoreError>;

    /// Fast read: mirror first, then the authoritative path, then any local copy.
    async fn fetch(&self, path: &str) -> Result<String, StoreError>;

    /// Write `content` at `path`. With `sha`, fails with `Conflict` unless the
    /// current version matches; without, creates the file. Returns the new token.
    async fn put(
        &self,
        path: &str,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<String, StoreError>;

    /// Delete the file at exactly version `sha`.
    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), StoreError>;
}
