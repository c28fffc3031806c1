//! Seed scenarios 1-4 from §8: create+unlock, add+fetch, trash/restore
//! lossiness, and password rewrap preserving existing item content.

use agile_vault::error::VaultError;
use agile_vault::model::{ItemContent, Url};
use agile_vault::vault_api::{self, VaultApi};
use agile_vault::vault_store;
use tempfile::TempDir;

fn new_vault_dir() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.agilekeychain");
    (dir, path)
}

#[test]
fn scenario_1_create_and_unlock() {
    let (_dir, path) = new_vault_dir();
    vault_store::create_vault(&path, "hunter2").unwrap();

    let store = vault_store::open_vault(&path).unwrap();
    vault_api::open_local(store, "hunter2").expect("correct password unlocks");

    let store = vault_store::open_vault(&path).unwrap();
    let err = vault_api::open_local(store, "wrong").unwrap_err();
    assert!(matches!(err, VaultError::DecryptError(_)));
}

#[test]
fn scenario_2_add_and_fetch() {
    let (_dir, path) = new_vault_dir();
    let store = vault_store::create_vault(&path, "hunter2").unwrap();
    let mut api = vault_api::open_local(store, "hunter2").unwrap();

    let content = ItemContent {
        urls: vec![Url {
            label: "site".into(),
            url: "https://example.com".into(),
        }],
        ..Default::default()
    };
    let item = api
        .add_item("Example", "webforms.WebForm", &content)
        .unwrap();
    assert_eq!(item.uuid.len(), 32);
    assert!(item.uuid.chars().all(|c| c.is_ascii_hexdigit()));

    let matches = api.lookup_by_pattern("exam");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].uuid, item.uuid);

    let decrypted = api.load_content(&item.uuid).unwrap();
    assert_eq!(decrypted, content);
}

#[test]
fn scenario_3_trash_then_restore_is_lossy() {
    let (_dir, path) = new_vault_dir();
    let store = vault_store::create_vault(&path, "hunter2").unwrap();
    let mut api = vault_api::open_local(store, "hunter2").unwrap();

    let item = api
        .add_item("Example", "webforms.WebForm", &ItemContent::default())
        .unwrap();

    let trashed = api.trash(&item.uuid).unwrap();
    assert!(trashed.trashed);
    assert_eq!(trashed.type_name, "system.Tombstone");
    assert_eq!(trashed.contents_hash, "");

    let view = api.load_item(&item.uuid).unwrap();
    assert!(view.trashed);
    assert_eq!(view.type_name, "system.Tombstone");

    let err = api.restore(&item.uuid).unwrap_err();
    assert!(matches!(err, VaultError::Tombstoned));
}

#[test]
fn scenario_4_rewrap_preserves_item_content() {
    let (_dir, path) = new_vault_dir();
    let store = vault_store::create_vault(&path, "hunter2").unwrap();
    let mut api = vault_api::open_local(store, "hunter2").unwrap();

    let content = ItemContent {
        notes: "a very secret note".into(),
        ..Default::default()
    };
    let item = api.add_item("Bank", "webforms.WebForm", &content).unwrap();

    api.set_master_password("hunter2", "Tr0ub4dor", 1000)
        .unwrap();

    let store = vault_store::open_vault(&path).unwrap();
    let err = vault_api::open_local(store, "hunter2").unwrap_err();
    assert!(matches!(err, VaultError::DecryptError(_)));

    let store = vault_store::open_vault(&path).unwrap();
    let api2: VaultApi<_> = vault_api::open_local(store, "Tr0ub4dor").unwrap();
    let decrypted = api2.load_content(&item.uuid).unwrap();
    assert_eq!(decrypted, content);
}

#[test]
fn index_file_consistency_after_mixed_operations() {
    let (_dir, path) = new_vault_dir();
    let store = vault_store::create_vault(&path, "hunter2").unwrap();
    let mut api = vault_api::open_local(store, "hunter2").unwrap();

    let a = api
        .add_item("Alpha", "webforms.WebForm", &ItemContent::default())
        .unwrap();
    let b = api
        .add_item("Beta", "webforms.WebForm", &ItemContent::default())
        .unwrap();
    api.trash(&a.uuid).unwrap();
    api.remove(&b.uuid).unwrap();

    let store = vault_store::open_vault(&path).unwrap();
    assert_eq!(store.index().len(), 1);
    let entry = store.find_index_entry(&a.uuid).unwrap();
    let file = store.load_item(&a.uuid).unwrap();
    assert_eq!(entry.uuid, file.uuid);
    assert_eq!(entry.type_name, file.type_name);
    assert_eq!(entry.title, file.title);
    assert_eq!(entry.updated_at, file.updated_at);
    assert_eq!(entry.trashed, file.trashed);
    assert_eq!(entry.contents_hash, file.contents_hash);
    assert!(store.find_index_entry(&b.uuid).is_none());
}
