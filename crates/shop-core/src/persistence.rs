use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

const ONBOARDED_KEY: &str = "shop.launch.onboarded";
const ONBOARDING_RESULT_KEY: &str = "shop.launch.onboarding-result";
const BACKGROUND_DATE_KEY: &str = "shop.launch.background-date";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid persistence key '{0}'")]
    InvalidKey(String),
    #[error("malformed value stored under '{0}'")]
    Malformed(&'static str),
    #[error("persistence lock poisoned")]
    Poisoned,
}

/// Plain key/value storage for non-secret launch bookkeeping.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// One user-only file per key under a directory.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(key))
    }

    fn write_file(path: &Path, payload: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        Self::write_file(&self.path_for(key)?, value)
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPersistence {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Persistence for MemoryPersistence {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let values = self.values.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().map_err(|_| PersistenceError::Poisoned)?;
        values.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().map_err(|_| PersistenceError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// Typed view over the launch bookkeeping kept in [`Persistence`].
#[derive(Clone)]
pub struct PersistenceManager {
    backend: Arc<dyn Persistence>,
}

impl PersistenceManager {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self { backend }
    }

    pub fn is_onboarded(&self) -> Result<bool, PersistenceError> {
        Ok(self.backend.get(ONBOARDED_KEY)?.as_deref() == Some(b"1".as_slice()))
    }

    pub fn set_onboarded(&self, onboarded: bool) -> Result<(), PersistenceError> {
        if onboarded {
            self.backend.set(ONBOARDED_KEY, b"1")
        } else {
            self.backend.remove(ONBOARDED_KEY)
        }
    }

    pub fn onboarding_result(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.backend.get(ONBOARDING_RESULT_KEY)
    }

    pub fn store_onboarding_result(&self, data: &[u8]) -> Result<(), PersistenceError> {
        self.backend.set(ONBOARDING_RESULT_KEY, data)
    }

    pub fn background_date(&self) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        let Some(raw) = self.backend.get(BACKGROUND_DATE_KEY)? else {
            return Ok(None);
        };
        let text =
            String::from_utf8(raw).map_err(|_| PersistenceError::Malformed(BACKGROUND_DATE_KEY))?;
        DateTime::parse_from_rfc3339(text.trim())
            .map(|date| Some(date.with_timezone(&Utc)))
            .map_err(|_| PersistenceError::Malformed(BACKGROUND_DATE_KEY))
    }

    pub fn set_background_date(&self, date: Option<DateTime<Utc>>) -> Result<(), PersistenceError> {
        match date {
            Some(date) => self
                .backend
                .set(BACKGROUND_DATE_KEY, date.to_rfc3339().as_bytes()),
            None => self.backend.remove(BACKGROUND_DATE_KEY),
        }
    }

    /// Forget everything about the previous onboarding.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        self.backend.remove(ONBOARDED_KEY)?;
        self.backend.remove(ONBOARDING_RESULT_KEY)?;
        self.backend.remove(BACKGROUND_DATE_KEY)
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager").finish_non_exhaustive()
    }
}
