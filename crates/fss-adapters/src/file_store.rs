use fss_core::error::FssError;
use fss_core::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    entries: BTreeMap<String, String>,
}

/// JSON-file [`Store`], rewritten atomically after every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Opens `path`; a missing or empty file starts an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, FssError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path).map_err(|err| io_error(&path, err))?;
            if bytes.is_empty() {
                StoreData::default()
            } else {
                serde_json::from_slice(&bytes).map_err(|err| {
                    FssError::Storage(format!("{} is not a valid store: {}", path.display(), err))
                })?
            }
        } else {
            StoreData::default()
        };

        tracing::debug!(path = %path.display(), entries = data.entries.len(), "opened file store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>, FssError> {
        self.data
            .lock()
            .map_err(|_| FssError::Storage("file store lock poisoned".to_string()))
    }

    fn persist(&self, data: &StoreData) -> Result<(), FssError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
            }
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes).map_err(|err| io_error(&tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| io_error(&self.path, err))?;
        Ok(())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> FssError {
    FssError::Storage(format!("{}: {}", path.display(), err))
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, FssError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FssError> {
        let mut data = self.lock()?;
        data.entries.insert(key.to_string(), value.to_string());
        self.persist(&data)
    }

    fn remove(&self, key: &str) -> Result<(), FssError> {
        let mut data = self.lock()?;
        if data.entries.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), FssError> {
        let mut data = self.lock()?;
        data.entries.clear();
        self.persist(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fss_core::store::{KEY_IDENTITY, KEY_QUOTA_ID};

    #[test]
    fn entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".fss-storage").join("store.json");

        let store = FileStore::load(&path).unwrap();
        store.set(KEY_QUOTA_ID, "104").unwrap();
        store.set(KEY_IDENTITY, r#"{"tokenId":"1"}"#).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reopened = FileStore::load(&path).unwrap();
        assert_eq!(reopened.get(KEY_QUOTA_ID).unwrap().as_deref(), Some("104"));
        reopened.remove(KEY_QUOTA_ID).unwrap();

        let again = FileStore::load(&path).unwrap();
        assert!(again.get(KEY_QUOTA_ID).unwrap().is_none());
        assert!(again.get(KEY_IDENTITY).unwrap().is_some());
    }

    #[test]
    fn empty_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"").unwrap();

        let store = FileStore::load(&path).unwrap();
        assert!(store.get(KEY_IDENTITY).unwrap().is_none());
        store.clear().unwrap();
        assert!(FileStore::load(&path).unwrap().get(KEY_IDENTITY).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{not json").unwrap();

        let err = FileStore::load(&path).unwrap_err();
        assert!(matches!(err, FssError::Storage(_)));
    }
}
