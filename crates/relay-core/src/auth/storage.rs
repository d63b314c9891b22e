use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ConfigLocator;

use super::AuthError;

/// Plain string values persisted across runs under fixed keys.
pub trait ClientStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn remove(&self, key: &str) -> Result<(), AuthError>;
}

/// One file per key inside the user configuration directory.
pub struct FileStorage {
    locator: ConfigLocator,
}

impl FileStorage {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, AuthError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

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

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.locator.storage_file(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let value = raw.trim();
        Ok((!value.is_empty()).then(|| value.to_owned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        Self::write_file(&self.locator.storage_file(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        match fs::remove_file(self.locator.storage_file(key)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process storage; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn with_value(key: &str, value: &str) -> Self {
        let storage = Self::default();
        storage
            .lock()
            .insert(key.to_owned(), value.to_owned());
        storage
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TOKEN_STORAGE_KEY;
    use tempfile::TempDir;

    #[test]
    fn file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf()).unwrap();
        let storage = FileStorage::new(locator);
        storage.set(TOKEN_STORAGE_KEY, "token-123").unwrap();
        assert_eq!(
            storage.get(TOKEN_STORAGE_KEY).unwrap().as_deref(),
            Some("token-123")
        );
        storage.remove(TOKEN_STORAGE_KEY).unwrap();
        assert!(storage.get(TOKEN_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf()).unwrap();
        let storage = FileStorage::new(locator);
        storage.remove("missing").unwrap();
    }

    #[test]
    fn memory_clones_share_state() {
        let storage = MemoryStorage::with_value("k", "v");
        let clone = storage.clone();
        clone.remove("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }
}
