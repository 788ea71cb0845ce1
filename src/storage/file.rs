//! TOML-file backed store

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Entry, KeyValueStore, StorageError, WriteOptions};
use crate::auth::clock::{Clock, SystemClock};

/// Store persisted as a single TOML file of entries.
///
/// The file is rewritten on every mutation. It may hold credentials, so it
/// is created with owner-only permissions.
pub struct FileStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<String>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| self.read_error(e))
    }

    fn load(&self) -> Result<BTreeMap<String, Entry>, StorageError> {
        match self.read()? {
            Some(content) => toml::from_str(&content).map_err(|e| self.read_error(e)),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Entries to rewrite on a mutation. Unparseable content is discarded;
    /// a file that cannot be read at all is left alone.
    fn load_for_update(&self) -> Result<BTreeMap<String, Entry>, StorageError> {
        let Some(content) = self.read()? else {
            return Ok(BTreeMap::new());
        };
        match toml::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!("Replacing corrupt store {}: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, Entry>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;
        }

        let content = toml::to_string_pretty(entries).map_err(|e| self.write_error(e))?;
        fs::write(&self.path, content).map_err(|e| self.write_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).map_err(|e| self.write_error(e))?;
        }

        Ok(())
    }

    fn read_error(&self, e: impl std::fmt::Display) -> StorageError {
        StorageError::Read {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }

    fn write_error(&self, e: impl std::fmt::Display) -> StorageError {
        StorageError::Write {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("{}", e);
                return None;
            }
        };
        let now = self.clock.now();
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: &str, options: &WriteOptions) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let mut entries = self.load_for_update()?;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(key.to_string(), Entry::new(value, options, now));
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load_for_update()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::storage::CookiePolicy;
    use chrono::Duration;

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.toml");

        let store = FileStore::new(&path);
        store
            .set("userData", r#"{"id":"u1"}"#, &WriteOptions::default())
            .unwrap();
        store
            .set("tokenExpiryTime", "1700000000000", &WriteOptions::default())
            .unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("userData").as_deref(), Some(r#"{"id":"u1"}"#));
        assert_eq!(
            reopened.get("tokenExpiryTime").as_deref(),
            Some("1700000000000")
        );

        reopened.remove("userData").unwrap();
        assert!(store.get("userData").is_none());
    }

    #[test]
    fn test_file_store_drops_expired_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = FileStore::with_clock(dir.path().join("credentials.toml"), clock.clone());

        store
            .set(
                "refreshToken",
                "rt",
                &WriteOptions::cookie(CookiePolicy::local(), Duration::days(7)),
            )
            .unwrap();
        assert_eq!(store.get("refreshToken").as_deref(), Some("rt"));

        clock.advance(Duration::days(8));
        assert!(store.get("refreshToken").is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let store = FileStore::new(&path);
        assert!(store.get("anything").is_none());

        // A write replaces the corrupt content.
        store.set("k", "v", &WriteOptions::default()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_unreadable_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.toml");
        let original = [0xffu8, 0xfe, 0x00, 0x80];
        fs::write(&path, original).unwrap();

        let store = FileStore::new(&path);
        let err = store.set("k", "v", &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, StorageError::Read { .. }));
        assert!(store.remove("k").is_err());
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("credentials.toml"));
        store.set("k", "v", &WriteOptions::default()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
