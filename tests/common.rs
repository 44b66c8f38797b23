//! Test utilities & fixtures.
//! Builds an in-memory store seeded with an index and a synchronizer over it.

use std::sync::Arc;

use charsheet::character::{CharacterRecord, ListMinimums};
use charsheet::index::{IndexEntry, IndexRecord};
use charsheet::store::MemoryStore;
use charsheet::sync::{IndexSynchronizer, SyncOptions};

pub const INDEX: &str = "data/characters/index.json";

/// Index body in the exact form the synchronizer writes it.
pub fn index_json(entries: &[(&str, &str)]) -> String {
    let index = IndexRecord {
        characters: entries
            .iter()
            .map(|(id, name)| IndexEntry::new(id, name, &format!("data/characters/{id}.json")))
            .collect(),
        ..IndexRecord::default()
    };
    index.to_json_pretty().unwrap()
}

/// Store holding an index with `entries` (and no character files).
pub fn seeded_store(entries: &[(&str, &str)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert(INDEX, &index_json(entries));
    store
}

#[allow(dead_code)] // not every test binary tunes the options
pub fn options() -> SyncOptions {
    SyncOptions {
        minimums: ListMinimums::uniform(2),
        ..SyncOptions::default()
    }
}

#[allow(dead_code)]
pub fn synchronizer(store: &Arc<MemoryStore>) -> IndexSynchronizer {
    IndexSynchronizer::new(store.clone(), options())
}

#[allow(dead_code)]
pub fn synchronizer_with(store: &Arc<MemoryStore>, opts: SyncOptions) -> IndexSynchronizer {
    IndexSynchronizer::new(store.clone(), opts)
}

/// Unsaved record with its name field set.
#[allow(dead_code)]
pub fn named(name: &str) -> CharacterRecord {
    let mut record = CharacterRecord::new(&options().minimums);
    record.touch_field("Textbox1", name);
    record
}

#[allow(dead_code)]
pub fn read_index(store: &MemoryStore) -> IndexRecord {
    IndexRecord::parse(&store.read(INDEX).expect("index present")).unwrap()
}
