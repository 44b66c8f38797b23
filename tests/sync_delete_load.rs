//! Delete and load through the index.
mod common;

use charsheet::auth::ScriptedPrompter;
use charsheet::character::ListKind;
use charsheet::index::IndexEntry;
use charsheet::sync::SyncError;
use common::*;

#[tokio::test]
async fn delete_removes_file_then_entry() {
    let store = seeded_store(&[]);
    let sync = synchronizer(&store);
    let mut record = named("Nuka Girl");
    let prompter = ScriptedPrompter::always("nuka");
    sync.save(&mut record, &prompter).await.unwrap();

    let outcome = sync.delete("nuka-girl", "Nuka Girl", &prompter).await.unwrap();

    assert!(!outcome.file_was_missing);
    assert_eq!(outcome.entry.id, "nuka-girl");
    assert!(!store.contains("data/characters/nuka-girl.json"));
    assert!(read_index(&store).characters.is_empty());
    let history = store.history();
    assert_eq!(
        &history[history.len() - 2..],
        [
            "delete data/characters/nuka-girl.json".to_string(),
            format!("put {INDEX}")
        ]
    );
}

#[tokio::test]
async fn dangling_entry_is_cleaned_up() {
    let store = seeded_store(&[("ghost", "Ghost"), ("max", "Max")]);
    let sync = synchronizer(&store);

    let outcome = sync
        .delete("ghost", "Ghost", &ScriptedPrompter::new(["ghost"]))
        .await
        .unwrap();

    assert!(outcome.file_was_missing);
    let index = read_index(&store);
    assert!(!index.contains("ghost"));
    assert!(index.contains("max"));
    assert_eq!(store.counts().delete, 0);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let store = seeded_store(&[("max", "Max")]);
    let sync = synchronizer(&store);
    let err = sync
        .delete("nobody", "Nobody", &ScriptedPrompter::new(["nobody"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert_eq!(store.counts().put, 0);
}

#[tokio::test]
async fn delete_requires_a_selection() {
    let store = seeded_store(&[]);
    let sync = synchronizer(&store);
    let err = sync
        .delete("", "", &ScriptedPrompter::new([""]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(store.counts().total(), 0);
}

#[tokio::test]
async fn delete_gate_rejects_second_word() {
    let store = seeded_store(&[("nuka-girl", "Nuka Girl")]);
    store.insert("data/characters/nuka-girl.json", "{}");
    let sync = synchronizer(&store);

    let err = sync
        .delete("nuka-girl", "Nuka Girl", &ScriptedPrompter::new(["girl"]))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::Denied);
    assert_eq!(store.counts().total(), 0);
    assert!(store.contains("data/characters/nuka-girl.json"));
}

#[tokio::test]
async fn delete_uses_the_recorded_file_path() {
    let store = seeded_store(&[]);
    let mut index = read_index(&store);
    index
        .characters
        .push(IndexEntry::new("legacy", "Legacy", "data/old/legacy-sheet.json"));
    store.insert(INDEX, &index.to_json_pretty().unwrap());
    store.insert("data/old/legacy-sheet.json", "{}");
    let sync = synchronizer(&store);

    sync.delete("legacy", "Legacy", &ScriptedPrompter::new(["legacy"]))
        .await
        .unwrap();
    assert!(!store.contains("data/old/legacy-sheet.json"));
}

#[tokio::test]
async fn load_normalizes_old_records() {
    let store = seeded_store(&[("max", "Max")]);
    store.insert(
        "data/characters/max.json",
        r#"{"id":"max","fields":{"Textbox1":"Max","Textbox9":12},"lists":{"weapons":[{"name":"Sawed-off"}]}}"#,
    );
    let sync = synchronizer(&store);

    let loaded = sync.load("max").await.unwrap();
    let record = loaded.record;
    assert_eq!(record.id, "max");
    assert_eq!(record.version, 1);
    assert_eq!(record.fields["Textbox9"].as_text(), Some("12"));
    for kind in ListKind::ALL {
        assert!(record.lists.get(kind).len() >= 2);
    }
    assert_eq!(
        record.lists.get(ListKind::Weapons)[0]["name"].as_text(),
        Some("Sawed-off")
    );
    // reads go through the fast path only
    assert_eq!(store.counts().get, 0);
}

#[tokio::test]
async fn load_takes_id_from_the_index() {
    let store = seeded_store(&[("max", "Max")]);
    store.insert("data/characters/max.json", r#"{"fields":{"Textbox1":"Max"}}"#);
    let sync = synchronizer(&store);
    assert_eq!(sync.load("max").await.unwrap().record.id, "max");
}

#[tokio::test]
async fn load_failures() {
    let store = seeded_store(&[("max", "Max")]);
    let mut index = read_index(&store);
    index.characters.push(IndexEntry::new("nofile", "No File", ""));
    index
        .characters
        .push(IndexEntry::new("escape", "Escape", "../../etc/passwd"));
    store.insert(INDEX, &index.to_json_pretty().unwrap());
    let sync = synchronizer(&store);

    assert!(matches!(
        sync.load("nobody").await.unwrap_err(),
        SyncError::NotFound(_)
    ));
    assert!(matches!(
        sync.load("nofile").await.unwrap_err(),
        SyncError::NotFound(_)
    ));
    assert!(matches!(
        sync.load("escape").await.unwrap_err(),
        SyncError::Malformed { .. }
    ));
    // indexed but the file itself is gone
    assert!(matches!(
        sync.load("max").await.unwrap_err(),
        SyncError::NotFound(_)
    ));
}

#[tokio::test]
async fn corrupt_index_is_reported() {
    let store = seeded_store(&[]);
    store.insert(INDEX, "<html>rate limited</html>");
    let sync = synchronizer(&store);
    assert!(matches!(
        sync.list().await.unwrap_err(),
        SyncError::Malformed { .. }
    ));
}
