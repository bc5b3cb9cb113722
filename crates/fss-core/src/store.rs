use crate::error::FssError;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Storage key of the delegated key identity (JSON).
pub const KEY_IDENTITY: &str = "pkp";
/// Storage key of the capacity quota token id.
pub const KEY_QUOTA_ID: &str = "capacityCreditId";

/// Small key/value persistence for identities that outlive the process.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, FssError>;

    fn set(&self, key: &str, value: &str) -> Result<(), FssError>;

    fn remove(&self, key: &str) -> Result<(), FssError>;

    fn clear(&self) -> Result<(), FssError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, FssError> {
        self.entries
            .lock()
            .map_err(|_| FssError::Storage("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, FssError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FssError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), FssError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), FssError> {
        self.lock()?.clear();
        Ok(())
    }
}
