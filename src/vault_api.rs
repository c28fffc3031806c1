//! C5 — VaultAPI: the operations a CLI (or agent-backed client) drives a
//! vault through. Each operation either mutates the `VaultStore` atomically
//! or reads a view of it; all crypto goes through a `CryptoProvider` so the
//! same code works whether keys are unwrapped in-process or held by a
//! separate agent — unwrapped key material never has to leave the process
//! that holds it.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::keystore::{CryptoProvider, LocalKeyStore, SecurityLevelId};
use crate::model::{IndexEntry, Item, ItemContent, TOMBSTONE_TYPE};
use crate::vault_store::{self, VaultStore};

/// A read-only projection of an item suitable for `ListItems`/`LoadItem`
/// callers who have not necessarily unlocked the vault.
#[derive(Debug, Clone)]
pub struct ItemView {
    pub uuid: String,
    pub type_name: String,
    pub title: String,
    pub location: String,
    pub folder_uuid: String,
    pub updated_at: i64,
    pub trashed: bool,
    pub contents_hash: String,
}

impl From<&IndexEntry> for ItemView {
    fn from(e: &IndexEntry) -> Self {
        ItemView {
            uuid: e.uuid.clone(),
            type_name: e.type_name.clone(),
            title: e.title.clone(),
            location: e.location.clone(),
            folder_uuid: e.folder_uuid.clone(),
            updated_at: e.updated_at,
            trashed: e.trashed,
            contents_hash: e.contents_hash.clone(),
        }
    }
}

/// Security level new items are created under, per the resolved open
/// question in §9: SL3 capability is provisioned but never used for
/// content.
const DEFAULT_ITEM_LEVEL: SecurityLevelId = SecurityLevelId::Sl5;

/// The vault API surface, parameterized over however the caller supplies
/// crypto for content payloads.
pub struct VaultApi<K: CryptoProvider> {
    store: VaultStore,
    keys: K,
}

impl<K: CryptoProvider> VaultApi<K> {
    pub fn new(store: VaultStore, keys: K) -> Self {
        VaultApi { store, keys }
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    /// Full ordered list of index entries as item views.
    pub fn list_items(&self) -> Vec<ItemView> {
        self.store.index().iter().map(ItemView::from).collect()
    }

    /// A single item view, or `NotFound`.
    pub fn load_item(&self, uuid: &str) -> VaultResult<ItemView> {
        self.store
            .find_index_entry(uuid)
            .map(ItemView::from)
            .ok_or_else(|| VaultError::NotFound(format!("item {uuid}")))
    }

    /// Decrypts an item's content. Errors with `Locked` if the item's
    /// security level has not been unlocked, `Tombstoned` if the item has
    /// no content left to decrypt.
    pub fn load_content(&self, uuid: &str) -> VaultResult<ItemContent> {
        let item = self.store.load_item(uuid)?;
        if item.is_tombstone() {
            return Err(VaultError::Tombstoned);
        }
        let plaintext = self.keys.decrypt(item.security_level, &item.encrypted)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Items whose lowercased title contains `pattern`, whose uuid is
    /// prefixed by `pattern`, or whose `typeName` matches the alias exactly.
    pub fn lookup_by_pattern(&self, pattern: &str) -> Vec<ItemView> {
        let needle = pattern.to_lowercase();
        self.store
            .index()
            .iter()
            .filter(|e| {
                e.title.to_lowercase().contains(&needle)
                    || e.uuid.starts_with(pattern)
                    || e.type_name == pattern
            })
            .map(ItemView::from)
            .collect()
    }

    /// Like `lookup_by_pattern`, but requires exactly one match —
    /// `Ambiguous` if more than one, `NotFound` if none.
    pub fn lookup_unique(&self, pattern: &str) -> VaultResult<ItemView> {
        let mut matches = self.lookup_by_pattern(pattern);
        match matches.len() {
            0 => Err(VaultError::NotFound(format!("no item matches {pattern}"))),
            1 => Ok(matches.remove(0)),
            n => Err(VaultError::Ambiguous(n)),
        }
    }

    /// Creates a new item: fresh uuid, timestamps, SL5 encryption of
    /// `content`, persisted atomically.
    pub fn add_item(&mut self, title: &str, type_name: &str, content: &ItemContent) -> VaultResult<Item> {
        let plaintext = serde_json::to_vec(content)?;
        let encrypted = self.keys.encrypt(DEFAULT_ITEM_LEVEL, &plaintext)?;
        let now = Utc::now().timestamp();

        let item = Item {
            uuid: Uuid::new_v4().simple().to_string(),
            type_name: type_name.to_string(),
            title: title.to_string(),
            location: String::new(),
            folder_uuid: String::new(),
            created_at: now,
            updated_at: now,
            trashed: false,
            security_level: DEFAULT_ITEM_LEVEL,
            contents_hash: vault_store::contents_hash(title, content),
            open_contents: serde_json::json!({}),
            encrypted,
        };

        self.store.write_item(&item)?;
        Ok(item)
    }

    /// Re-encrypts `content` for an existing item, recomputing
    /// `contentsHash` and `updatedAt`, then persists.
    pub fn set_content(&mut self, uuid: &str, content: &ItemContent) -> VaultResult<Item> {
        let mut item = self.store.load_item(uuid)?;
        if item.is_tombstone() {
            return Err(VaultError::Tombstoned);
        }

        let plaintext = serde_json::to_vec(content)?;
        item.encrypted = self.keys.encrypt(item.security_level, &plaintext)?;
        item.contents_hash = vault_store::contents_hash(&item.title, content);
        item.updated_at = Utc::now().timestamp();

        self.store.write_item(&item)?;
        Ok(item)
    }

    /// Persists an already-built `Item` verbatim (§4.4 atomic write). Callers
    /// that only change metadata (title, location, folder) without touching
    /// content use this directly; `contentsHash` is the caller's
    /// responsibility in that case.
    pub fn save(&mut self, item: &Item) -> VaultResult<()> {
        self.store.write_item(item)
    }

    /// Hard-deletes an item: file and index entry both gone.
    pub fn remove(&mut self, uuid: &str) -> VaultResult<()> {
        self.store.remove_item(uuid)
    }

    /// Soft-deletes: `trashed=true`, `typeName` rewritten to the tombstone
    /// type, `encrypted`/`contentsHash` cleared. Irreversible content loss,
    /// by design (§3 lifecycle, §9 open question).
    pub fn trash(&mut self, uuid: &str) -> VaultResult<Item> {
        let mut item = self.store.load_item(uuid)?;
        if item.is_tombstone() {
            return Err(VaultError::Tombstoned);
        }

        item.trashed = true;
        item.type_name = TOMBSTONE_TYPE.to_string();
        item.encrypted.clear();
        item.contents_hash.clear();
        item.updated_at = Utc::now().timestamp();

        self.store.write_item(&item)?;
        Ok(item)
    }

    /// Restoring a tombstoned item is documented as lossy: the plaintext is
    /// gone, so there is nothing to restore to. Always errors with
    /// `Tombstoned` for a tombstoned item; for a live (non-trashed) item
    /// there is simply nothing to do, so it is a no-op success.
    pub fn restore(&mut self, uuid: &str) -> VaultResult<Item> {
        let item = self.store.load_item(uuid)?;
        if item.is_tombstone() {
            return Err(VaultError::Tombstoned);
        }
        Ok(item)
    }

    /// Re-wraps every security level under `new_password` and persists the
    /// updated `encryptionKeys.js`. Item files are untouched — existing
    /// ciphertext stays valid because the underlying level keys never
    /// change, only how they are wrapped. Verifies `old_password` itself
    /// (independent of whatever keys `self` was opened with) by unlocking a
    /// fresh `LocalKeyStore` from the on-disk `encryptionKeys.js`.
    pub fn set_master_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        iterations: u32,
    ) -> VaultResult<()> {
        let local = LocalKeyStore::unlock(&self.store.encryption_keys, old_password)?;
        let updated = local.rewrap_all(&self.store.encryption_keys, new_password, iterations)?;
        self.store.persist_encryption_keys(updated)
    }
}

/// Convenience constructor: unlock a freshly-opened vault's keys in-process
/// and build a `VaultApi` directly on top, with no agent involved.
pub fn open_local(
    store: VaultStore,
    password: &str,
) -> VaultResult<VaultApi<LocalKeyStore>> {
    let keys = LocalKeyStore::unlock(&store.encryption_keys, password)?;
    Ok(VaultApi::new(store, keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Url;
    use std::fs;
    use std::path::PathBuf;

    fn temp_vault_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "agile-vault-api-test-{name}-{}.agilekeychain",
            std::process::id()
        ));
        p
    }

    #[test]
    fn add_and_fetch_round_trip() {
        let path = temp_vault_path("add-fetch");
        let _ = fs::remove_dir_all(&path);
        let store = vault_store::create_vault(&path, "hunter2").unwrap();
        let mut api = open_local(store, "hunter2").unwrap();

        let content = ItemContent {
            urls: vec![Url {
                label: "site".into(),
                url: "https://example.com".into(),
            }],
            ..Default::default()
        };
        let item = api.add_item("Example", "webforms.WebForm", &content).unwrap();
        assert_eq!(item.uuid.len(), 32);

        let matches = api.lookup_by_pattern("exam");
        assert_eq!(matches.len(), 1);

        let decrypted = api.load_content(&item.uuid).unwrap();
        assert_eq!(decrypted, content);

        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn trash_then_restore_is_lossy() {
        let path = temp_vault_path("trash-restore");
        let _ = fs::remove_dir_all(&path);
        let store = vault_store::create_vault(&path, "hunter2").unwrap();
        let mut api = open_local(store, "hunter2").unwrap();

        let item = api
            .add_item("Example", "webforms.WebForm", &ItemContent::default())
            .unwrap();
        let trashed = api.trash(&item.uuid).unwrap();
        assert!(trashed.trashed);
        assert_eq!(trashed.type_name, TOMBSTONE_TYPE);
        assert_eq!(trashed.contents_hash, "");

        let err = api.restore(&item.uuid).unwrap_err();
        assert!(matches!(err, VaultError::Tombstoned));

        fs::remove_dir_all(&path).unwrap();
    }
}
