//! The session controller owns the one mutable [`CharacterRecord`] of a session,
//! the picker contents and the current selection. Every edit goes through
//! [`Controller::apply`] so every change refreshes the record's timestamp.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::Prompter;
use crate::character::{CharacterRecord, FieldValue, ListKind};
use crate::index::{IndexRecord, NameOrder};
use crate::logutil::escape_log;
use crate::sync::{IndexSynchronizer, SyncError};

use super::LocalStateFile;

/// A single mutation of the in-memory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    SetField { name: String, value: FieldValue },
    ClearField { name: String },
    SetCell {
        list: ListKind,
        row: usize,
        column: String,
        value: FieldValue,
    },
    AddRow { list: ListKind },
    RemoveRow { list: ListKind, row: usize },
    /// Drop the last row, as the sheet's "remove row" button does.
    RemoveLastRow { list: ListKind },
}

pub struct Controller {
    sync: IndexSynchronizer,
    prompter: Arc<dyn Prompter>,
    local: LocalStateFile,
    record: CharacterRecord,
    selected: Option<String>,
    choices: IndexRecord,
}

impl Controller {
    pub fn new(sync: IndexSynchronizer, prompter: Arc<dyn Prompter>, local: LocalStateFile) -> Self {
        let record = CharacterRecord::new(&sync.options().minimums);
        Self {
            sync,
            prompter,
            local,
            record,
            selected: None,
            choices: IndexRecord::default(),
        }
    }

    pub fn record(&self) -> &CharacterRecord {
        &self.record
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn choices(&self) -> &IndexRecord {
        &self.choices
    }

    fn name_field(&self) -> &str {
        &self.sync.options().name_field
    }

    fn display_name(&self) -> String {
        let name = self.record.name(self.name_field());
        if name.is_empty() {
            self.record.id.clone()
        } else {
            name.to_string()
        }
    }

    /// Apply one edit. Returns `false` when the edit was a permitted no-op
    /// (clearing an unset field, removing a row from a list at its minimum).
    pub fn apply(&mut self, edit: Edit) -> Result<bool, SyncError> {
        let minimums = self.sync.options().minimums;
        let changed = match edit {
            Edit::SetField { name, value } => {
                if name.trim().is_empty() {
                    return Err(SyncError::Validation("Field name is empty".to_string()));
                }
                self.record.touch_field(&name, value);
                true
            }
            Edit::ClearField { name } => self.record.clear_field(&name),
            Edit::SetCell {
                list,
                row,
                column,
                value,
            } => {
                if !self.record.touch_cell(list, row, &column, value) {
                    return Err(SyncError::Validation(format!(
                        "{} has no row {} (it has {})",
                        list,
                        row,
                        self.record.lists.get(list).len()
                    )));
                }
                true
            }
            Edit::AddRow { list } => {
                self.record.add_row(list);
                true
            }
            Edit::RemoveRow { list, row } => self.record.remove_row(list, row, &minimums),
            Edit::RemoveLastRow { list } => match self.record.lists.get(list).len().checked_sub(1) {
                Some(last) => self.record.remove_row(list, last, &minimums),
                None => false,
            },
        };
        Ok(changed)
    }

    /// Discard the in-memory record and start a blank one.
    pub fn new_character(&mut self) -> String {
        self.record = CharacterRecord::new(&self.sync.options().minimums);
        self.selected = None;
        "New character".to_string()
    }

    pub fn select(&mut self, id: Option<String>) {
        self.selected = id.filter(|s| !s.trim().is_empty());
    }

    /// Replace the in-memory record with an imported document.
    pub fn replace_record(&mut self, raw: Value) -> Result<String, SyncError> {
        let record = CharacterRecord::normalize(raw, &self.sync.options().minimums).map_err(|e| {
            SyncError::Malformed {
                path: "imported record".to_string(),
                reason: e.to_string(),
            }
        })?;
        self.selected = Some(record.id.clone()).filter(|id| !id.is_empty());
        self.record = record;
        Ok(format!("Imported: {}", self.display_name()))
    }

    pub async fn refresh_choices(&mut self) -> Result<&IndexRecord, SyncError> {
        self.choices = self.sync.list().await?;
        Ok(&self.choices)
    }

    /// Populate the picker and try to reopen the last character. Nothing here
    /// is fatal; on any failure the session starts with a blank record.
    pub async fn startup(&mut self) -> String {
        if let Err(e) = self.refresh_choices().await {
            warn!("could not load the character list: {}", e);
            return format!("Character list unavailable: {e}");
        }
        let last = match self.local.load() {
            Ok(state) => state.last_character_id,
            Err(e) => {
                warn!("could not read local state: {}", e);
                None
            }
        };
        let Some(last) = last.filter(|id| self.choices.contains(id)) else {
            return self.new_character();
        };
        self.selected = Some(last);
        match self.load_selected().await {
            Ok(notice) => notice,
            Err(e) => {
                warn!("could not reopen the last character: {}", e);
                self.new_character()
            }
        }
    }

    pub async fn load_selected(&mut self) -> Result<String, SyncError> {
        let id = self
            .selected
            .clone()
            .ok_or_else(|| SyncError::Validation("Select a character first.".to_string()))?;
        let outcome = self.sync.load(&id).await?;
        self.record = outcome.record;
        self.remember_last(Some(&id));
        Ok(format!("Loaded: {}", outcome.entry.display_name()))
    }

    /// Save the in-memory record. The record gains its id and timestamp only
    /// once its file is written; picker and selection change only on success.
    pub async fn save(&mut self) -> Result<String, SyncError> {
        let outcome = self
            .sync
            .save(&mut self.record, self.prompter.as_ref())
            .await?;

        let entry = &outcome.entry;
        // The mirror lags behind writes; patch the picker rather than re-reading it.
        self.choices.upsert(&entry.id, &entry.name, &entry.file);
        self.choices
            .sort_with(&NameOrder::for_locale(&self.sync.options().collation_locale));
        self.selected = Some(entry.id.clone());
        self.remember_last(Some(&entry.id));

        Ok(if outcome.created {
            format!("Saved new character: {}", entry.display_name())
        } else {
            format!("Saved changes: {}", entry.display_name())
        })
    }

    pub async fn delete_selected(&mut self) -> Result<String, SyncError> {
        let id = self.selected.clone().unwrap_or_default();
        let gate_name = if id.is_empty() || self.record.id == id {
            self.record.name(self.name_field()).to_string()
        } else {
            self.choices
                .find(&id)
                .map(|e| e.display_name().to_string())
                .unwrap_or_else(|| id.clone())
        };

        let outcome = self
            .sync
            .delete(&id, &gate_name, self.prompter.as_ref())
            .await?;

        self.choices.remove(&id);
        self.new_character();
        match self.local.load() {
            Ok(state) if state.last_character_id.as_deref() == Some(id.as_str()) => {
                self.remember_last(None)
            }
            Ok(_) => {}
            Err(e) => warn!("could not read local state: {}", e),
        }
        if outcome.file_was_missing {
            debug!("'{}' had no file on the store", id);
        }
        Ok(format!("Deleted: {}", outcome.entry.display_name()))
    }

    /// Persist the last opened id. Failures only cost the next startup restore.
    fn remember_last(&self, id: Option<&str>) {
        let result = self
            .local
            .update(|state| state.last_character_id = id.map(str::to_string));
        match result {
            Ok(_) => info!(
                "last opened character: {}",
                id.map(escape_log).unwrap_or_else(|| "(none)".to_string())
            ),
            Err(e) => warn!("could not remember last opened character: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScriptedPrompter;
    use crate::character::ListMinimums;
    use crate::store::MemoryStore;
    use crate::sync::SyncOptions;

    fn controller(dir: &std::path::Path) -> Controller {
        let store = Arc::new(MemoryStore::new());
        let opts = SyncOptions {
            minimums: ListMinimums::uniform(2),
            ..SyncOptions::default()
        };
        Controller::new(
            IndexSynchronizer::new(store, opts),
            Arc::new(ScriptedPrompter::always("max")),
            LocalStateFile::new(dir.join("state.json")),
        )
    }

    #[test]
    fn edits_go_through_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        let before = c.record().meta.updated_at;
        assert!(c
            .apply(Edit::SetField {
                name: "Textbox1".into(),
                value: "Max".into()
            })
            .unwrap());
        assert!(c.record().meta.updated_at > before);
        assert!(c.apply(Edit::AddRow { list: ListKind::Ammo }).unwrap());
        assert_eq!(c.record().lists.get(ListKind::Ammo).len(), 3);
        assert!(c.apply(Edit::RemoveLastRow { list: ListKind::Ammo }).unwrap());
        assert!(!c.apply(Edit::RemoveLastRow { list: ListKind::Ammo }).unwrap());
        assert_eq!(c.record().lists.get(ListKind::Ammo).len(), 2);
    }

    #[test]
    fn cell_outside_the_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        let err = c
            .apply(Edit::SetCell {
                list: ListKind::Perks,
                row: 9,
                column: "name".into(),
                value: "Toughness".into(),
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn import_selects_the_record_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        let notice = c
            .replace_record(serde_json::json!({
                "id": "nuka-girl",
                "fields": { "Textbox1": "Nuka Girl" }
            }))
            .unwrap();
        assert_eq!(notice, "Imported: Nuka Girl");
        assert_eq!(c.selected(), Some("nuka-girl"));
        assert_eq!(c.record().lists.get(ListKind::Weapons).len(), 2);
    }
}
