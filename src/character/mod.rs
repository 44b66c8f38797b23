//! # Character Record Model
//!
//! The in-memory form of one character sheet and the rules that keep it valid:
//!
//! - [`CharacterRecord`] - schema tag, stable id, sparse field map, repeatable lists, metadata
//! - [`FieldValue`] - a field or cell holds either text or a checkbox state
//! - [`ListKind`] - the fixed set of repeatable lists on the sheet
//! - [`ListMinimums`] - minimum visible rows per list
//!
//! Records read from the store may predate fields that were added later, so
//! everything coming off the wire goes through [`CharacterRecord::normalize`],
//! which fills defaults and pads lists to their minimum length.
//!
//! ## Serialized form
//!
//! ```json
//! {
//!   "version": 1,
//!   "id": "max-rockatansky",
//!   "fields": { "Textbox1": "Max Rockatansky", "Checkbox3": true },
//!   "lists": { "weapons": [ { "name": "Sawed-off" }, {} ], "ammo": [], "equipment": [], "perks": [] },
//!   "meta": { "updatedAt": "2026-10-16T08:15:00.000Z" }
//! }
//! ```
//!
//! Maps are `BTreeMap`s so re-serializing an unmodified record yields the same
//! bytes, which keeps repeated saves from churning version tokens.

pub mod layout;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use layout::ListMinimums;

/// Current schema tag written into every record.
pub const SCHEMA_VERSION: u32 = 1;

/// Value of a single form field or list cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, FieldValue::Flag(true))
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Flag(b)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Flag(b) => write!(f, "{}", if *b { "[x]" } else { "[ ]" }),
        }
    }
}

/// One row of a repeatable list: column key → value. Rows are identified by position.
pub type Row = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Weapons,
    Ammo,
    Equipment,
    Perks,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Weapons,
        ListKind::Ammo,
        ListKind::Equipment,
        ListKind::Perks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Weapons => "weapons",
            ListKind::Ammo => "ammo",
            ListKind::Equipment => "equipment",
            ListKind::Perks => "perks",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown list '{0}' (expected weapons, ammo, equipment or perks)")]
pub struct UnknownList(pub String);

impl FromStr for ListKind {
    type Err = UnknownList;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownList(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lists {
    #[serde(default)]
    pub weapons: Vec<Row>,
    #[serde(default)]
    pub ammo: Vec<Row>,
    #[serde(default)]
    pub equipment: Vec<Row>,
    #[serde(default)]
    pub perks: Vec<Row>,
}

impl Lists {
    pub fn get(&self, kind: ListKind) -> &Vec<Row> {
        match kind {
            ListKind::Weapons => &self.weapons,
            ListKind::Ammo => &self.ammo,
            ListKind::Equipment => &self.equipment,
            ListKind::Perks => &self.perks,
        }
    }

    pub fn get_mut(&mut self, kind: ListKind) -> &mut Vec<Row> {
        match kind {
            ListKind::Weapons => &mut self.weapons,
            ListKind::Ammo => &mut self.ammo,
            ListKind::Equipment => &mut self.equipment,
            ListKind::Perks => &mut self.perks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default = "now_millis")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            updated_at: now_millis(),
        }
    }
}

fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Empty until the first save; never changes afterwards.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub lists: Lists,
    #[serde(default)]
    pub meta: Meta,
}

impl CharacterRecord {
    /// A fresh, unsaved record with every list padded to its minimum.
    pub fn new(minimums: &ListMinimums) -> Self {
        let mut record = CharacterRecord {
            version: SCHEMA_VERSION,
            id: String::new(),
            fields: BTreeMap::new(),
            lists: Lists::default(),
            meta: Meta::default(),
        };
        record.pad_lists(minimums);
        record
    }

    /// Merge a raw JSON document over the defaults and pad lists.
    ///
    /// `null` values are dropped (absent means unset), numbers are kept as text,
    /// and a row that is not an object becomes an empty row so later rows keep
    /// their positions.
    pub fn normalize(raw: Value, minimums: &ListMinimums) -> Result<Self, serde_json::Error> {
        let cleaned = match raw {
            Value::Object(mut top) => {
                top.retain(|_, v| !v.is_null());
                if let Some(Value::Object(fields)) = top.get_mut("fields") {
                    clean_cells(fields);
                }
                if let Some(Value::Object(lists)) = top.get_mut("lists") {
                    lists.retain(|_, v| !v.is_null());
                    for rows in lists.values_mut() {
                        if let Value::Array(rows) = rows {
                            for row in rows.iter_mut() {
                                match row {
                                    Value::Object(cells) => clean_cells(cells),
                                    other => *other = Value::Object(Default::default()),
                                }
                            }
                        }
                    }
                }
                Value::Object(top)
            }
            other => other,
        };
        let mut record: CharacterRecord = serde_json::from_value(cleaned)?;
        record.pad_lists(minimums);
        Ok(record)
    }

    /// Parse stored JSON text and normalize it.
    pub fn from_json(text: &str, minimums: &ListMinimums) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))?;
        Self::normalize(raw, minimums)
    }

    /// Pretty JSON with two-space indentation, the on-store format.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn pad_lists(&mut self, minimums: &ListMinimums) {
        for kind in ListKind::ALL {
            let min = minimums.min_rows(kind);
            let rows = self.lists.get_mut(kind);
            while rows.len() < min {
                rows.push(Row::new());
            }
        }
    }

    /// Trimmed text of the name field, empty when unset.
    pub fn name<'a>(&'a self, name_field: &str) -> &'a str {
        self.fields
            .get(name_field)
            .and_then(FieldValue::as_text)
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn is_saved(&self) -> bool {
        !self.id.is_empty()
    }

    /// Refresh `meta.updatedAt`. Strictly increases within a process even if the
    /// wall clock stalls or steps back.
    pub fn touch(&mut self) {
        let now = now_millis();
        self.meta.updated_at = if now > self.meta.updated_at {
            now
        } else {
            self.meta.updated_at + chrono::Duration::milliseconds(1)
        };
    }

    pub fn touch_field(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
        self.touch();
    }

    /// Remove a field entirely (back to unset). Returns whether it was present.
    pub fn clear_field(&mut self, name: &str) -> bool {
        let removed = self.fields.remove(name).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Set one cell of an existing row. Returns `false` (and changes nothing) if
    /// the row does not exist.
    pub fn touch_cell(
        &mut self,
        list: ListKind,
        row: usize,
        column: &str,
        value: impl Into<FieldValue>,
    ) -> bool {
        let Some(cells) = self.lists.get_mut(list).get_mut(row) else {
            return false;
        };
        cells.insert(column.to_string(), value.into());
        self.touch();
        true
    }

    /// Append an empty row. Returns the new length.
    pub fn add_row(&mut self, list: ListKind) -> usize {
        let rows = self.lists.get_mut(list);
        rows.push(Row::new());
        let len = rows.len();
        self.touch();
        len
    }

    /// Remove the row at `row`. Rejected (returns `false`) when the list is at
    /// its minimum length or the index is out of range.
    pub fn remove_row(&mut self, list: ListKind, row: usize, minimums: &ListMinimums) -> bool {
        let rows = self.lists.get_mut(list);
        if rows.len() <= minimums.min_rows(list) || row >= rows.len() {
            return false;
        }
        rows.remove(row);
        self.touch();
        true
    }
}

fn clean_cells(cells: &mut serde_json::Map<String, Value>) {
    cells.retain(|_, v| matches!(v, Value::String(_) | Value::Bool(_) | Value::Number(_)));
    for v in cells.values_mut() {
        if let Value::Number(n) = v {
            *v = Value::String(n.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_is_padded_and_unsaved() {
        let mins = ListMinimums::default();
        let r = CharacterRecord::new(&mins);
        assert!(!r.is_saved());
        assert_eq!(r.version, SCHEMA_VERSION);
        for kind in ListKind::ALL {
            assert_eq!(r.lists.get(kind).len(), mins.min_rows(kind));
        }
    }

    #[test]
    fn normalize_fills_defaults_for_old_records() {
        let mins = ListMinimums::uniform(2);
        let raw = json!({
            "id": "dogmeat",
            "fields": { "Textbox1": "Dogmeat", "Gone": null, "Level": 3 },
            "lists": { "weapons": [ { "name": "Bite", "junk": [1] }, 7 ] }
        });
        let r = CharacterRecord::normalize(raw, &mins).unwrap();
        assert_eq!(r.version, 1);
        assert_eq!(r.id, "dogmeat");
        assert!(!r.fields.contains_key("Gone"));
        assert_eq!(r.fields.get("Level"), Some(&FieldValue::Text("3".into())));
        assert_eq!(r.lists.weapons.len(), 2);
        assert_eq!(r.lists.weapons[0].len(), 1);
        assert!(r.lists.weapons[1].is_empty());
        assert_eq!(r.lists.perks.len(), 2);
    }

    #[test]
    fn normalize_keeps_longer_lists() {
        let mins = ListMinimums::uniform(1);
        let raw = json!({ "lists": { "ammo": [ {}, {}, { "kind": ".44" } ] } });
        let r = CharacterRecord::normalize(raw, &mins).unwrap();
        assert_eq!(r.lists.ammo.len(), 3);
    }

    #[test]
    fn touch_is_strictly_monotonic() {
        let mut r = CharacterRecord::new(&ListMinimums::uniform(0));
        let mut last = r.meta.updated_at;
        for i in 0..50 {
            r.touch_field("Textbox1", format!("n{i}"));
            assert!(r.meta.updated_at > last);
            last = r.meta.updated_at;
        }
    }

    #[test]
    fn list_kind_parses_case_insensitively() {
        assert_eq!("Weapons".parse::<ListKind>().unwrap(), ListKind::Weapons);
        assert!("grenades".parse::<ListKind>().is_err());
    }

    #[test]
    fn pretty_output_uses_camel_case_meta() {
        let r = CharacterRecord::new(&ListMinimums::uniform(0));
        let text = r.to_json_pretty().unwrap();
        assert!(text.contains("\"updatedAt\""));
        assert!(text.starts_with("{\n  \"version\": 1,"));
    }
}
