//! C4 — VaultStore: on-disk layout, the `contents.js` index, atomic item
//! writes, the advisory write lock, and the index/file consistency
//! invariant described in §3 and §4.4.

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};
use crate::keystore::{self, EncryptionKeys, SecurityLevelId, DEFAULT_ITERATIONS};
use crate::model::{Item, IndexEntry, ItemContent};

const PROFILE_DIR: &str = "data/default";
const ENCRYPTION_KEYS_FILE: &str = "encryptionKeys.js";
const CONTENTS_FILE: &str = "contents.js";
const WRITE_LOCK_FILE: &str = ".write.lock";

/// An open vault: its paths, the decoded `encryptionKeys.js`, and an
/// in-memory copy of the index, kept in insertion order for the lifetime of
/// the vault.
pub struct VaultStore {
    root: PathBuf,
    pub encryption_keys: EncryptionKeys,
    index: Vec<IndexEntry>,
}

fn profile_dir(root: &Path) -> PathBuf {
    root.join(PROFILE_DIR)
}

fn item_path(root: &Path, uuid: &str) -> PathBuf {
    profile_dir(root).join(format!("{uuid}.1password"))
}

/// Validates that `path` looks like an Agile Keychain vault: it ends with
/// `.agilekeychain`, and its `encryptionKeys.js`/`contents.js` are readable,
/// well-shaped JSON. Any mismatch is `CorruptVault`.
pub fn check_vault(path: &Path) -> VaultResult<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !name.ends_with(".agilekeychain") {
        return Err(VaultError::CorruptVault(
            "vault path must end with .agilekeychain".into(),
        ));
    }

    let keys_path = profile_dir(path).join(ENCRYPTION_KEYS_FILE);
    let keys_raw = fs::read_to_string(&keys_path)?;
    let _: EncryptionKeys = serde_json::from_str(&keys_raw)?;

    let contents_path = profile_dir(path).join(CONTENTS_FILE);
    let contents_raw = fs::read_to_string(&contents_path)?;
    let _: Vec<IndexEntry> = serde_json::from_str(&contents_raw)?;

    Ok(())
}

/// Creates a brand-new vault at `path`: directory tree, both SL3 and SL5
/// security levels wrapped under `master_password`, and an empty index.
pub fn create_vault(path: &Path, master_password: &str) -> VaultResult<VaultStore> {
    create_vault_with_iterations(path, master_password, DEFAULT_ITERATIONS)
}

pub fn create_vault_with_iterations(
    path: &Path,
    master_password: &str,
    iterations: u32,
) -> VaultResult<VaultStore> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !name.ends_with(".agilekeychain") {
        return Err(VaultError::CorruptVault(
            "vault path must end with .agilekeychain".into(),
        ));
    }

    fs::create_dir_all(profile_dir(path))?;

    let sl3 = keystore::create_level(SecurityLevelId::Sl3, master_password, iterations)?;
    let sl5 = keystore::create_level(SecurityLevelId::Sl5, master_password, iterations)?;
    let encryption_keys = EncryptionKeys {
        sl3: Some(sl3.identifier.clone()),
        sl5: Some(sl5.identifier.clone()),
        list: vec![sl3, sl5],
    };

    let keys_json = serde_json::to_string_pretty(&encryption_keys)?;
    fs::write(profile_dir(path).join(ENCRYPTION_KEYS_FILE), keys_json)?;
    fs::write(profile_dir(path).join(CONTENTS_FILE), "[]")?;

    Ok(VaultStore {
        root: path.to_path_buf(),
        encryption_keys,
        index: Vec::new(),
    })
}

/// Opens an existing vault, reconciling the on-disk index against the
/// item files actually present per §4.4: an orphan item file gets a
/// reconstructed index entry; an index entry whose file is missing is
/// dropped with a warning. Leftover `.tmp` files from an interrupted write
/// are removed.
pub fn open_vault(path: &Path) -> VaultResult<VaultStore> {
    check_vault(path)?;

    let keys_raw = fs::read_to_string(profile_dir(path).join(ENCRYPTION_KEYS_FILE))?;
    let encryption_keys: EncryptionKeys = serde_json::from_str(&keys_raw)?;

    let contents_raw = fs::read_to_string(profile_dir(path).join(CONTENTS_FILE))?;
    let mut index: Vec<IndexEntry> = serde_json::from_str(&contents_raw)?;

    let mut on_disk_uuids = HashMap::new();
    for entry in fs::read_dir(profile_dir(path))? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(stem) = file_name.strip_suffix(".1password") {
            on_disk_uuids.insert(stem.to_string(), entry.path());
        } else if file_name.ends_with(".tmp") {
            let _ = fs::remove_file(entry.path());
        }
    }

    index.retain(|entry| {
        let present = on_disk_uuids.contains_key(&entry.uuid);
        if !present {
            tracing::warn!(uuid = %entry.uuid, "index entry references a missing item file, dropping");
        }
        present
    });

    let indexed: std::collections::HashSet<String> =
        index.iter().map(|e| e.uuid.clone()).collect();
    for (uuid, file_path) in &on_disk_uuids {
        if indexed.contains(uuid) {
            continue;
        }
        let raw = fs::read_to_string(file_path)?;
        let item: Item = serde_json::from_str(&raw)?;
        tracing::warn!(uuid = %uuid, "item file missing from index, reconstructing entry");
        index.push(item.to_index_entry());
    }

    Ok(VaultStore {
        root: path.to_path_buf(),
        encryption_keys,
        index,
    })
}

impl VaultStore {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn find_index_entry(&self, uuid: &str) -> Option<&IndexEntry> {
        self.index.iter().find(|e| e.uuid == uuid)
    }

    pub fn load_item(&self, uuid: &str) -> VaultResult<Item> {
        let path = item_path(&self.root, uuid);
        let raw = fs::read_to_string(&path)
            .map_err(|_| VaultError::NotFound(format!("item {uuid}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Atomic item write per §4.4: tmp file + fsync + rename for the item,
    /// then the in-memory index update, then the same tmp/fsync/rename
    /// dance for `contents.js`.
    pub fn write_item(&mut self, item: &Item) -> VaultResult<()> {
        let _lock = WriteLock::acquire(&self.root)?;

        let final_path = item_path(&self.root, &item.uuid);
        let tmp_path = final_path.with_extension("1password.tmp");
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(serde_json::to_string_pretty(item)?.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        let new_entry = item.to_index_entry();
        if let Some(existing) = self.index.iter_mut().find(|e| e.uuid == item.uuid) {
            *existing = new_entry;
        } else {
            self.index.push(new_entry);
        }

        self.persist_index()
    }

    /// Hard-deletes an item: removes the file, then drops the index entry,
    /// then rewrites `contents.js`.
    pub fn remove_item(&mut self, uuid: &str) -> VaultResult<()> {
        let _lock = WriteLock::acquire(&self.root)?;

        let path = item_path(&self.root, uuid);
        fs::remove_file(&path).or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        self.index.retain(|e| e.uuid != uuid);
        self.persist_index()
    }

    fn persist_index(&self) -> VaultResult<()> {
        let contents_path = profile_dir(&self.root).join(CONTENTS_FILE);
        let tmp_path = contents_path.with_extension("js.tmp");
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(serde_json::to_string(&self.index)?.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &contents_path)
    }

    /// Persists a rewrapped `encryptionKeys.js` atomically. Item files are
    /// untouched; only the key-wrapping layer changes.
    pub fn persist_encryption_keys(&mut self, keys: EncryptionKeys) -> VaultResult<()> {
        let _lock = WriteLock::acquire(&self.root)?;

        let final_path = profile_dir(&self.root).join(ENCRYPTION_KEYS_FILE);
        let tmp_path = final_path.with_extension("js.tmp");
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(serde_json::to_string_pretty(&keys)?.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        self.encryption_keys = keys;
        Ok(())
    }
}

/// Computes the contentsHash invariant (§4.4, canonicalization rule in §6):
/// SHA-1 over title + every URL + every non-empty-designation web-form field
/// value + every section field value, in that order; first 16 hex chars.
pub fn contents_hash(title: &str, content: &ItemContent) -> String {
    let mut hasher = Sha1::new();
    hasher.update(title.as_bytes());
    for url in &content.urls {
        hasher.update(url.url.as_bytes());
    }
    for field in &content.web_form_fields {
        if !field.designation.is_empty() {
            hasher.update(field.value.as_bytes());
        }
    }
    for section in &content.sections {
        for field in &section.fields {
            hasher.update(field.value.to_canonical_string().as_bytes());
        }
    }
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Advisory mutual-exclusion lock over `data/default/.write.lock`, held for
/// the duration of one mutating operation. Implemented as exclusive file
/// creation rather than a kernel file lock — simple, and sufficient for the
/// single-writer-at-a-time contract in §5.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(root: &Path) -> VaultResult<Self> {
        let path = profile_dir(root).join(WRITE_LOCK_FILE);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    VaultError::Conflict
                } else {
                    VaultError::IoError(e.to_string())
                }
            })?;
        Ok(WriteLock { path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Url, WebFormField};

    fn temp_vault_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("agile-vault-test-{name}-{}.agilekeychain", std::process::id()));
        p
    }

    #[test]
    fn create_and_reopen_round_trip() {
        let path = temp_vault_path("create-reopen");
        let _ = fs::remove_dir_all(&path);
        create_vault(&path, "hunter2").unwrap();
        let reopened = open_vault(&path).unwrap();
        assert!(reopened.index().is_empty());
        assert!(reopened.encryption_keys.sl3.is_some());
        assert!(reopened.encryption_keys.sl5.is_some());
        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn orphan_item_file_is_reconstructed_into_index() {
        let path = temp_vault_path("orphan");
        let _ = fs::remove_dir_all(&path);
        let mut store = create_vault(&path, "hunter2").unwrap();

        let item = Item {
            uuid: "deadbeefdeadbeefdeadbeefdeadbeef".into(),
            type_name: "webforms.WebForm".into(),
            title: "Example".into(),
            location: String::new(),
            folder_uuid: String::new(),
            created_at: 1,
            updated_at: 1,
            trashed: false,
            security_level: SecurityLevelId::Sl5,
            contents_hash: "0000000000000000".into(),
            open_contents: serde_json::json!({}),
            encrypted: "".into(),
        };
        store.write_item(&item).unwrap();

        // Simulate a crash between the item-file rename and the index
        // rewrite: blow away contents.js.
        fs::write(profile_dir(&path).join(CONTENTS_FILE), "[]").unwrap();

        let reopened = open_vault(&path).unwrap();
        assert_eq!(reopened.index().len(), 1);
        assert_eq!(reopened.index()[0].uuid, item.uuid);

        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn contents_hash_is_deterministic() {
        let content = ItemContent {
            urls: vec![Url {
                label: "site".into(),
                url: "https://example.com".into(),
            }],
            web_form_fields: vec![WebFormField {
                name: "username".into(),
                id: "1".into(),
                field_type: "T".into(),
                designation: "username".into(),
                value: "alice".into(),
            }],
            ..Default::default()
        };
        let h1 = contents_hash("Example", &content);
        let h2 = contents_hash("Example", &content);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }
}
