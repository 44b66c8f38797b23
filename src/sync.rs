//! # Index Synchronizer
//!
//! Keeps the index file and the per-character files consistent on a store that
//! only offers single-file compare-and-swap.
//!
//! ## Protocol
//!
//! Every mutation is two-phase:
//!
//! 1. write (or delete) the leaf file, without a version precondition;
//! 2. read the index, patch one entry, write it back conditional on the `sha`
//!    that was read. On `Conflict` the read-patch-write round is repeated, at most
//!    [`SyncOptions::index_retry_limit`] extra times.
//!
//! A failure in phase 1 leaves the index untouched. A failure in phase 2 after
//! phase 1 succeeded is not rolled back: the leaf file is orphaned until the next
//! successful save of the same id, which overwrites it.
//!
//! ```text
//! save:    gate → validate name → derive id → PUT <dir>/<id>.json → GET index → upsert → sort → PUT index (CAS, retry)
//! delete:  gate → GET index → find entry → DELETE entry.file (missing is fine) → remove → PUT index (CAS, retry)
//! load:    fast-read index → find entry → fast-read entry.file → normalize
//! ```

use log::{debug, info, warn};
use std::sync::Arc;

use crate::auth::{self, Denied, Prompter};
use crate::character::{CharacterRecord, ListMinimums};
use crate::config::{CollisionPolicy, Config};
use crate::ident::{derive_id, disambiguate};
use crate::index::{IndexEntry, IndexRecord, NameOrder};
use crate::logutil::{escape_log, OneLine};
use crate::store::{RemoteStore, StoreError};
use crate::validation::{
    character_file_path, is_valid_id, validate_character_name, validate_store_path, NameError,
};

pub const INDEX_COMMIT_MESSAGE: &str = "Update character index";
pub const INDEX_CREATE_MESSAGE: &str = "Create character index";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),

    #[error("Wrong password.")]
    Denied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} was changed by someone else at the same time; try again")]
    Conflict(String),

    #[error("Missing or invalid GitHub token (store one with `charsheet remember-token`)")]
    Unauthorized,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{path} is not a valid document: {reason}")]
    Malformed { path: String, reason: String },
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { path } => SyncError::NotFound(path),
            StoreError::Conflict { path } => SyncError::Conflict(path),
            StoreError::Unauthorized => SyncError::Unauthorized,
            StoreError::Unavailable(msg) => SyncError::Unavailable(msg),
        }
    }
}

impl From<Denied> for SyncError {
    fn from(_: Denied) -> Self {
        SyncError::Denied
    }
}

impl From<NameError> for SyncError {
    fn from(e: NameError) -> Self {
        SyncError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub characters_dir: String,
    pub index_path: String,
    pub name_field: String,
    /// Extra index read-patch-write rounds after a conflict.
    pub index_retry_limit: u32,
    pub collision_policy: CollisionPolicy,
    /// Locale the index is sorted in.
    pub collation_locale: String,
    pub minimums: ListMinimums,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            characters_dir: config.repo.characters_dir.clone(),
            index_path: config.repo.index_path.clone(),
            name_field: config.sync.name_field.clone(),
            index_retry_limit: config.sync.index_retry_limit,
            collision_policy: config.sync.collision_policy,
            collation_locale: config.sync.collation_locale.clone(),
            minimums: config.lists,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub entry: IndexEntry,
    /// The record had no id before this save.
    pub created: bool,
    /// Index write attempts, 1 when no conflict occurred.
    pub index_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub record: CharacterRecord,
    pub entry: IndexEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub entry: IndexEntry,
    /// The character file was already gone; only the index entry was removed.
    pub file_was_missing: bool,
    pub index_attempts: u32,
}

struct IndexSnapshot {
    index: IndexRecord,
    content: String,
    sha: String,
}

pub struct IndexSynchronizer {
    store: Arc<dyn RemoteStore>,
    opts: SyncOptions,
}

impl IndexSynchronizer {
    pub fn new(store: Arc<dyn RemoteStore>, opts: SyncOptions) -> Self {
        Self { store, opts }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.opts
    }

    pub fn character_path(&self, id: &str) -> String {
        character_file_path(&self.opts.characters_dir, id)
    }

    fn malformed(path: &str, reason: impl ToString) -> SyncError {
        SyncError::Malformed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// A missing index is a setup problem, not an empty character list.
    fn index_error(&self, e: StoreError) -> SyncError {
        match e {
            StoreError::NotFound { .. } => SyncError::Unavailable(format!(
                "character index {} does not exist (run `charsheet init-index`)",
                self.opts.index_path
            )),
            other => other.into(),
        }
    }

    fn parse_index(&self, text: &str) -> Result<IndexRecord, SyncError> {
        IndexRecord::parse(text).map_err(|e| Self::malformed(&self.opts.index_path, e))
    }

    /// Index via the fast read path, for the picker and for loading.
    pub async fn list(&self) -> Result<IndexRecord, SyncError> {
        let text = self
            .store
            .fetch(&self.opts.index_path)
            .await
            .map_err(|e| self.index_error(e))?;
        self.parse_index(&text)
    }

    async fn read_index(&self) -> Result<IndexSnapshot, SyncError> {
        let file = self
            .store
            .get(&self.opts.index_path)
            .await
            .map_err(|e| self.index_error(e))?;
        Ok(IndexSnapshot {
            index: self.parse_index(&file.content)?,
            content: file.content,
            sha: file.sha,
        })
    }

    /// Read-patch-CAS the index. `first` is an already-read snapshot to use for
    /// the first round. Returns the number of rounds used.
    async fn patch_index<F>(
        &self,
        mut first: Option<IndexSnapshot>,
        mut patch: F,
    ) -> Result<u32, SyncError>
    where
        F: FnMut(&mut IndexRecord) + Send,
    {
        let path = self.opts.index_path.as_str();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let snapshot = match first.take() {
                Some(s) => s,
                None => self.read_index().await?,
            };
            let IndexSnapshot {
                mut index,
                content,
                sha,
            } = snapshot;
            patch(&mut index);
            index.sort_with(&NameOrder::for_locale(&self.opts.collation_locale));
            let body = index
                .to_json_pretty()
                .map_err(|e| Self::malformed(path, e))?;
            if body == content {
                debug!("index unchanged, skipping write");
                return Ok(attempt);
            }
            match self
                .store
                .put(path, &body, Some(&sha), INDEX_COMMIT_MESSAGE)
                .await
            {
                Ok(_) => return Ok(attempt),
                Err(e) if e.is_conflict() && attempt <= self.opts.index_retry_limit => {
                    warn!(
                        "index write conflict (attempt {}/{}), re-reading",
                        attempt,
                        self.opts.index_retry_limit + 1
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write a character file, last writer wins: the current token is read
    /// right before the write only because the API requires it for updates.
    async fn write_character(&self, path: &str, body: &str, message: &str) -> Result<(), SyncError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let sha = match self.store.get(path).await {
                Ok(file) if file.content == body => return Ok(()),
                Ok(file) => Some(file.sha),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            match self.store.put(path, body, sha.as_deref(), message).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && attempt <= self.opts.index_retry_limit => {
                    debug!("{} changed between read and write, retrying", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete a character file. Returns `true` if it was already absent.
    async fn delete_character(&self, path: &str, message: &str) -> Result<bool, SyncError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let file = match self.store.get(path).await {
                Ok(file) => file,
                Err(e) if e.is_not_found() => return Ok(true),
                Err(e) => return Err(e.into()),
            };
            match self.store.delete(path, &file.sha, message).await {
                Ok(()) => return Ok(false),
                Err(e) if e.is_not_found() => return Ok(true),
                Err(e) if e.is_conflict() && attempt <= self.opts.index_retry_limit => {
                    debug!("{} changed before delete, retrying", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Save (create or update) `record`. `record` gains its id and timestamp
    /// once the character file is written; before that it is left untouched.
    pub async fn save(
        &self,
        record: &mut CharacterRecord,
        prompter: &dyn Prompter,
    ) -> Result<SaveOutcome, SyncError> {
        auth::authorize(record, &self.opts.name_field, prompter)?;
        let name = validate_character_name(record.name(&self.opts.name_field))?.to_string();

        let created = !record.is_saved();
        let mut draft = record.clone();
        let mut snapshot = None;
        if created {
            let base = derive_id(&name);
            let id = match self.opts.collision_policy {
                CollisionPolicy::Overwrite => base,
                CollisionPolicy::Suffix => {
                    let snap = self.read_index().await?;
                    let id = disambiguate(&base, |candidate| snap.index.contains(candidate));
                    if id != base {
                        info!("id '{}' already taken, using '{}'", base, id);
                    }
                    snapshot = Some(snap);
                    id
                }
            };
            draft.id = id;
        } else if !is_valid_id(&record.id) {
            return Err(SyncError::Validation(format!(
                "Record id '{}' is not a valid identifier",
                escape_log(&record.id)
            )));
        }

        draft.touch();
        let id = draft.id.clone();
        let file = self.character_path(&id);
        let body = draft.to_json_pretty().map_err(|e| Self::malformed(&file, e))?;

        self.write_character(&file, &body, &format!("Update character: {name}"))
            .await?;
        // The file now exists under `id`; a later index failure must not lose it.
        *record = draft;

        let attempts = self
            .patch_index(snapshot, |index| index.upsert(&id, &name, &file))
            .await?;

        info!(
            "saved {} '{}' as {} (index attempts: {})",
            if created { "new character" } else { "character" },
            OneLine(&name),
            file,
            attempts
        );
        Ok(SaveOutcome {
            entry: IndexEntry::new(&id, &name, &file),
            created,
            index_attempts: attempts,
        })
    }

    /// Delete character `id`. `gate_name` is the display name the password is
    /// derived from (the loaded record's name, or the picker entry's).
    pub async fn delete(
        &self,
        id: &str,
        gate_name: &str,
        prompter: &dyn Prompter,
    ) -> Result<DeleteOutcome, SyncError> {
        auth::authorize_name(gate_name, prompter)?;
        if id.trim().is_empty() {
            return Err(SyncError::Validation("Select a character first.".to_string()));
        }

        let snapshot = self.read_index().await?;
        let entry = snapshot
            .index
            .find(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("character '{id}' in the index")))?;

        let file_was_missing = if entry.file.trim().is_empty() {
            warn!("index entry '{}' has no file path; removing the entry only", id);
            true
        } else {
            validate_store_path(&entry.file)
                .map_err(|e| Self::malformed(&self.opts.index_path, e))?;
            let message = format!("Delete character: {}", entry.display_name());
            self.delete_character(&entry.file, &message).await?
        };
        if file_was_missing {
            info!("character file for '{}' was already gone", id);
        }

        let attempts = self
            .patch_index(Some(snapshot), |index| {
                index.remove(id);
            })
            .await?;

        info!("deleted '{}' (index attempts: {})", OneLine(id), attempts);
        Ok(DeleteOutcome {
            entry,
            file_was_missing,
            index_attempts: attempts,
        })
    }

    /// Load character `id` through the fast read path.
    pub async fn load(&self, id: &str) -> Result<LoadOutcome, SyncError> {
        let index = self.list().await?;
        let entry = index
            .find(id)
            .filter(|e| !e.file.trim().is_empty())
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("file path for '{id}' in the index")))?;
        validate_store_path(&entry.file).map_err(|e| Self::malformed(&self.opts.index_path, e))?;

        let text = self.store.fetch(&entry.file).await?;
        let mut record = CharacterRecord::from_json(&text, &self.opts.minimums)
            .map_err(|e| Self::malformed(&entry.file, e))?;
        if record.id != entry.id {
            if !record.id.is_empty() {
                warn!(
                    "{} carries id '{}' but is indexed as '{}'; using the index id",
                    entry.file,
                    escape_log(&record.id),
                    entry.id
                );
            }
            record.id = entry.id.clone();
        }
        debug!("loaded {} from {}", entry.id, entry.file);
        Ok(LoadOutcome { record, entry })
    }

    /// Create an empty index (blind create). Fails if one already exists.
    pub async fn init_index(&self) -> Result<(), SyncError> {
        let path = self.opts.index_path.as_str();
        let body = IndexRecord::default()
            .to_json_pretty()
            .map_err(|e| Self::malformed(path, e))?;
        self.store
            .put(path, &body, None, INDEX_CREATE_MESSAGE)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                StoreError::Conflict { .. } => {
                    SyncError::Validation(format!("{path} already exists"))
                }
                other => other.into(),
            })
    }
}
