use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::crypto::{Envelope, StoreKey};
use super::StoreError;

struct Unlocked {
    key: StoreKey,
    entries: BTreeMap<String, String>,
}

/// Passcode-encrypted key/value container persisted as a single file.
///
/// The store is either closed (nothing decrypted in memory) or open. Every
/// mutation is written through to disk immediately.
pub struct SecureStore {
    path: PathBuf,
    kdf_rounds: u32,
    unlocked: Option<Unlocked>,
}

impl SecureStore {
    pub fn new(path: impl Into<PathBuf>, kdf_rounds: u32) -> Self {
        Self {
            path: path.into(),
            kdf_rounds,
            unlocked: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_provisioned(&self) -> bool {
        self.path.exists()
    }

    pub fn is_open(&self) -> bool {
        self.unlocked.is_some()
    }

    /// Provision an empty store keyed by `passcode`, replacing any earlier one. Leaves it open.
    pub fn create(&mut self, passcode: &str) -> Result<(), StoreError> {
        self.unlocked = None;
        let unlocked = Unlocked {
            key: StoreKey::generate(passcode, self.kdf_rounds),
            entries: BTreeMap::new(),
        };
        write_envelope(&self.path, &unlocked)?;
        self.unlocked = Some(unlocked);
        debug!(path = %self.path.display(), "secure store provisioned");
        Ok(())
    }

    /// Unlock an existing store. On any failure the store stays closed.
    pub fn open(&mut self, passcode: &str) -> Result<(), StoreError> {
        self.unlocked = None;
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotProvisioned)
            }
            Err(err) => return Err(err.into()),
        };
        let envelope: Envelope = serde_json::from_str(&raw)?;
        let (key, plaintext) = StoreKey::unseal(passcode, &envelope)?;
        let entries = serde_json::from_slice(&plaintext)?;
        self.unlocked = Some(Unlocked { key, entries });
        Ok(())
    }

    pub fn close(&mut self) {
        self.unlocked = None;
    }

    /// Re-encrypt the open store under `new_passcode` with a fresh salt.
    pub fn change_key(&mut self, new_passcode: &str) -> Result<(), StoreError> {
        let unlocked = self.unlocked.as_mut().ok_or(StoreError::Closed)?;
        let key = StoreKey::generate(new_passcode, self.kdf_rounds);
        let rekeyed = Unlocked {
            key,
            entries: unlocked.entries.clone(),
        };
        write_envelope(&self.path, &rekeyed)?;
        *unlocked = rekeyed;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let unlocked = self.unlocked.as_ref().ok_or(StoreError::Closed)?;
        Ok(unlocked.entries.get(key).cloned())
    }

    pub fn put(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let unlocked = self.unlocked.as_mut().ok_or(StoreError::Closed)?;
        let previous = unlocked.entries.insert(key.to_owned(), value);
        if let Err(err) = write_envelope(&self.path, unlocked) {
            match previous {
                Some(previous) => unlocked.entries.insert(key.to_owned(), previous),
                None => unlocked.entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let unlocked = self.unlocked.as_mut().ok_or(StoreError::Closed)?;
        if let Some(previous) = unlocked.entries.remove(key) {
            if let Err(err) = write_envelope(&self.path, unlocked) {
                unlocked.entries.insert(key.to_owned(), previous);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Destroy the on-disk store. The store ends closed with no data.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.unlocked = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn write_envelope(path: &Path, unlocked: &Unlocked) -> Result<(), StoreError> {
    let plaintext = serde_json::to_vec(&unlocked.entries)?;
    let envelope = unlocked.key.seal(&plaintext)?;
    let payload = serde_json::to_string_pretty(&envelope)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&staging)?;
    file.write_all(payload.as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perm = file.metadata()?.permissions();
        perm.set_mode(0o600);
        fs::set_permissions(&staging, perm)?;
    }

    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ROUNDS: u32 = 16;

    fn store_in(dir: &TempDir) -> SecureStore {
        SecureStore::new(dir.path().join("secure-store.json"), ROUNDS)
    }

    #[test]
    fn create_then_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.create("1234").unwrap();
        store.put("greeting", "hello".into()).unwrap();
        store.close();
        assert!(matches!(store.get("greeting"), Err(StoreError::Closed)));

        store.open("1234").unwrap();
        assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn failed_open_leaves_store_closed() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.create("1234").unwrap();
        assert!(store.is_open());

        assert!(matches!(
            store.open("0000"),
            Err(StoreError::AuthenticationFailed)
        ));
        assert!(!store.is_open());
    }

    #[test]
    fn open_requires_provisioning() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(!store.is_provisioned());
        assert!(matches!(store.open("1234"), Err(StoreError::NotProvisioned)));
    }

    #[test]
    fn change_key_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.create("1234").unwrap();
        store.put("k", "v".into()).unwrap();
        store.change_key("5678").unwrap();
        store.close();

        assert!(store.open("1234").is_err());
        store.open("5678").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn change_key_needs_open_store() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(matches!(store.change_key("1"), Err(StoreError::Closed)));
    }

    #[test]
    fn reset_destroys_blob() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.create("1234").unwrap();
        store.put("k", "v".into()).unwrap();
        store.reset().unwrap();

        assert!(!store.is_open());
        assert!(!store.is_provisioned());
        assert!(matches!(store.open("1234"), Err(StoreError::NotProvisioned)));
        store.reset().unwrap();
    }

    #[test]
    fn blob_does_not_contain_plaintext() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.create("1234").unwrap();
        store.put("secret", "super-secret-value".into()).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("super-secret-value"));
    }
}
