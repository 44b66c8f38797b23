//! # Session and Selection State
//!
//! - [`controller`] - the single owner of the in-memory record, the picker list and the selection
//! - [`queue`] - runs a controller on its own task so operations execute one at a time
//! - [`LocalStateFile`] - the small on-device file that survives between runs
//!
//! ## Local state file
//!
//! ```json
//! { "token": "ghp_...", "lastCharacterId": "max-rockatansky" }
//! ```
//!
//! Reads and writes are synchronous. Writes replace the file atomically under
//! an exclusive lock, and the file is created owner-readable only since it may
//! hold a credential.

pub mod controller;
pub mod queue;

use anyhow::{anyhow, Result};
use fs2::FileExt;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub use controller::{Controller, Edit};
pub use queue::{start_controller, ControllerHandle, SessionSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_character_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalStateFile {
    path: PathBuf,
}

impl LocalStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable content yields an empty state; this file only
    /// holds conveniences.
    pub fn load(&self) -> Result<LocalState> {
        match fs::read_to_string(&self.path) {
            Ok(data) => {
                let cleaned = data.trim_start_matches('\0');
                if cleaned.trim().is_empty() {
                    return Ok(LocalState::default());
                }
                match serde_json::from_str(cleaned) {
                    Ok(state) => Ok(state),
                    Err(e) => {
                        warn!("ignoring corrupt state file {}: {}", self.path.display(), e);
                        Ok(LocalState::default())
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocalState::default()),
            Err(e) => Err(anyhow!("Failed reading {}: {}", self.path.display(), e)),
        }
    }

    pub fn save(&self, state: &LocalState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| anyhow!("Failed to serialize local state: {}", e))?;
        write_file_locked(&self.path, &content)
    }

    /// Load, apply `f`, save. Returns the new state.
    pub fn update(&self, f: impl FnOnce(&mut LocalState)) -> Result<LocalState> {
        let mut state = self.load()?;
        f(&mut state);
        self.save(&state)?;
        Ok(state)
    }
}

fn open_private(path: &Path, create_new: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if create_new {
        opts.create_new(true);
    } else {
        opts.create(true).read(true).truncate(false);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Replace `path` with `content`: exclusive lock on the destination, write a
/// sibling temp file, fsync, rename over.
fn write_file_locked(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let lock_file = open_private(path, false)?;
    lock_file.lock_exclusive()?;

    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match open_private(&candidate, true) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(anyhow!("Failed to create temp file for atomic write: {}", e)),
        }
    };

    fs::rename(&tmp_path, path)?;
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = LocalStateFile::new(dir.path().join("state.json"));
        assert_eq!(file.load().unwrap(), LocalState::default());
    }

    #[test]
    fn update_persists_and_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let file = LocalStateFile::new(&path);
        file.update(|s| s.last_character_id = Some("max".into()))
            .unwrap();
        file.update(|s| s.token = Some("ghp_x".into())).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lastCharacterId\": \"max\""));
        let state = file.load().unwrap();
        assert_eq!(state.last_character_id.as_deref(), Some("max"));
        assert_eq!(state.token.as_deref(), Some("ghp_x"));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let file = LocalStateFile::new(&path);
        assert_eq!(file.load().unwrap(), LocalState::default());
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        LocalStateFile::new(&path)
            .save(&LocalState {
                token: Some("secret".into()),
                last_character_id: None,
            })
            .unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
