//! The character index: one JSON file listing every stored character.
//!
//! ```json
//! { "characters": [ { "id": "max-rockatansky", "name": "Max Rockatansky", "file": "data/characters/max-rockatansky.json" } ] }
//! ```
//!
//! Entries are unique by `id` and kept sorted by display name with a
//! locale-aware collator ([`NameOrder`], Czech unless configured otherwise).
//! The `file` of an entry read from the store is authoritative and never
//! re-derived from the id.

use icu_collator::{Collator, CollatorOptions};
use icu_locid::Locale;
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_COLLATION_LOCALE: &str = "cs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub file: String,
}

/// Hand-edited indexes carry `"name": null`; read it as an empty string.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl IndexEntry {
    pub fn new(id: &str, name: &str, file: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            file: file.to_string(),
        }
    }

    /// Name shown in the picker; falls back to the id for unnamed entries.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(default)]
    pub characters: Vec<IndexEntry>,
    /// Top-level keys this client does not know about, carried through writes untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IndexRecord {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text.trim_start_matches('\u{feff}'))
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn find(&self, id: &str) -> Option<&IndexEntry> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Update the entry for `id` in place, or append one. Any duplicate entries
    /// for the same id beyond the first are dropped.
    pub fn upsert(&mut self, id: &str, name: &str, file: &str) {
        let mut seen = false;
        self.characters.retain_mut(|c| {
            if c.id != id {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            c.name = name.to_string();
            c.file = file.to_string();
            true
        });
        if !seen {
            self.characters.push(IndexEntry::new(id, name, file));
        }
    }

    /// Remove every entry for `id`, returning the first one removed.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        let pos = self.characters.iter().position(|c| c.id == id)?;
        let removed = self.characters.remove(pos);
        self.characters.retain(|c| c.id != id);
        Some(removed)
    }

    /// Sort with the default (Czech) collation.
    pub fn sort(&mut self) {
        self.sort_with(&NameOrder::default());
    }

    pub fn sort_with(&mut self, order: &NameOrder) {
        self.characters.sort_by(|a, b| order.compare_entries(a, b));
    }

    pub fn is_sorted(&self) -> bool {
        let order = NameOrder::default();
        self.characters
            .windows(2)
            .all(|w| order.compare_entries(&w[0], &w[1]) != Ordering::Greater)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollationError {
    #[error("invalid collation locale '{0}'")]
    Locale(String),
    #[error("no collation data for '{locale}': {reason}")]
    Data { locale: String, reason: String },
}

/// Display-name ordering for the index. Czech sorts `č` after `c`, `ch` after
/// `h` and `ř` after `r`; other locales follow their own tables.
pub struct NameOrder {
    collator: Option<Collator>,
}

impl NameOrder {
    pub fn new(locale: &str) -> Result<Self, CollationError> {
        let parsed: Locale = locale
            .trim()
            .parse()
            .map_err(|_| CollationError::Locale(locale.to_string()))?;
        let collator = Collator::try_new(&parsed.into(), CollatorOptions::new()).map_err(|e| {
            CollationError::Data {
                locale: locale.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            collator: Some(collator),
        })
    }

    /// Like [`NameOrder::new`], but an unusable locale degrades to comparing
    /// [`collation_key`]s instead of failing.
    pub fn for_locale(locale: &str) -> Self {
        Self::new(locale).unwrap_or_else(|e| {
            warn!("{}; sorting by folded names", e);
            Self { collator: None }
        })
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let (a, b) = (a.trim(), b.trim());
        match &self.collator {
            Some(collator) => collator.compare(a, b),
            None => collation_key(a).cmp(&collation_key(b)),
        }
    }

    fn compare_entries(&self, a: &IndexEntry, b: &IndexEntry) -> Ordering {
        self.compare(a.display_name(), b.display_name())
            .then_with(|| a.display_name().cmp(b.display_name()))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Default for NameOrder {
    fn default() -> Self {
        Self::for_locale(DEFAULT_COLLATION_LOCALE)
    }
}

/// Case- and accent-folded form of a name: NFKD, combining marks dropped,
/// lowercased. "Élan", "elan" and "ELAN" share a key.
pub fn collation_key(s: &str) -> String {
    s.trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(idx: &IndexRecord) -> Vec<&str> {
        idx.characters.iter().map(|c| c.display_name()).collect()
    }

    #[test]
    fn sort_ignores_case_and_accents() {
        let mut idx = IndexRecord::default();
        idx.upsert("z", "zora", "f/z.json");
        idx.upsert("e", "Élise", "f/e.json");
        idx.upsert("a", "adam", "f/a.json");
        idx.upsert("b", "Bob", "f/b.json");
        idx.sort();
        assert_eq!(names(&idx), vec!["adam", "Bob", "Élise", "zora"]);
        assert!(idx.is_sorted());
    }

    #[test]
    fn czech_letters_sort_after_their_base_letters() {
        let mut idx = IndexRecord::default();
        for name in ["Šimon", "Chrudoš", "Řehoř", "Cyril", "Sára", "Hugo", "Čech", "Rudolf"] {
            idx.upsert(&crate::ident::derive_id(name), name, "f/x.json");
        }
        idx.sort();
        assert_eq!(
            names(&idx),
            vec!["Cyril", "Čech", "Hugo", "Chrudoš", "Rudolf", "Řehoř", "Sára", "Šimon"]
        );
        assert!(idx.is_sorted());
    }

    #[test]
    fn locale_is_configurable() {
        let mut idx = IndexRecord::default();
        idx.upsert("chrudos", "Chrudoš", "f/c.json");
        idx.upsert("hugo", "Hugo", "f/h.json");
        idx.sort_with(&NameOrder::new("en").unwrap());
        assert_eq!(names(&idx), vec!["Chrudoš", "Hugo"]);
        idx.sort();
        assert_eq!(names(&idx), vec!["Hugo", "Chrudoš"]);
    }

    #[test]
    fn bad_locale_is_rejected_or_folded() {
        assert!(matches!(
            NameOrder::new("not a locale!"),
            Err(CollationError::Locale(_))
        ));
        let order = NameOrder::for_locale("not a locale!");
        assert_eq!(order.compare("Élise", "adam"), Ordering::Greater);
        assert_eq!(order.compare("élise", "Elise"), Ordering::Equal);
    }

    #[test]
    fn null_name_and_file_read_as_empty() {
        let idx = IndexRecord::parse(
            r#"{"characters":[{"id":"old","name":null,"file":null},{"id":"new"}]}"#,
        )
        .unwrap();
        let old = idx.find("old").unwrap();
        assert_eq!(old.name, "");
        assert_eq!(old.file, "");
        assert_eq!(old.display_name(), "old");
        assert_eq!(idx.find("new").unwrap().file, "");
    }

    #[test]
    fn unnamed_entries_sort_by_id() {
        let mut idx = IndexRecord::default();
        idx.upsert("mm", "", "f/mm.json");
        idx.upsert("x", "Abe", "f/x.json");
        idx.sort();
        assert_eq!(names(&idx), vec!["Abe", "mm"]);
    }

    #[test]
    fn upsert_updates_in_place_and_collapses_duplicates() {
        let mut idx = IndexRecord::parse(
            r#"{"characters":[
                {"id":"a","name":"Old","file":"f/a.json"},
                {"id":"b","name":"B","file":"f/b.json"},
                {"id":"a","name":"Dup","file":"f/a2.json"}
            ]}"#,
        )
        .unwrap();
        idx.upsert("a", "New", "f/a.json");
        assert_eq!(idx.characters.len(), 2);
        assert_eq!(idx.find("a").unwrap().name, "New");
    }

    #[test]
    fn remove_returns_entry() {
        let mut idx = IndexRecord::default();
        idx.upsert("a", "A", "f/a.json");
        assert_eq!(idx.remove("a").unwrap().file, "f/a.json");
        assert!(idx.remove("a").is_none());
        assert!(idx.characters.is_empty());
    }

    #[test]
    fn unknown_top_level_keys_survive_a_rewrite() {
        let idx = IndexRecord::parse(r#"{"characters":[],"campaign":"Wasteland"}"#).unwrap();
        let text = idx.to_json_pretty().unwrap();
        assert!(text.contains("\"campaign\": \"Wasteland\""));
    }
}
