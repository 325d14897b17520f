/// Device-local key-value storage backed by sled.
/// Cache only: never the source of truth for conversations or messages.
use crate::error::{InboxError, Result};
use crate::model::Profile;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const PROFILE_PREFIX: &str = "profile:";

#[derive(Clone)]
pub struct LocalStore {
    db: Arc<sled::Db>,
}

impl LocalStore {
    /// Open the store in the given data directory
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("local.db");
        debug!("Opening local store at {:?}", db_path);

        let db = sled::open(&db_path)
            .map_err(|e| InboxError::Storage(format!("Failed to open local store: {}", e)))?;

        info!("Local store initialized at {:?}", db_path);
        Ok(Self { db: Arc::new(db) })
    }

    /// In-memory store, gone on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| InboxError::Storage(format!("Failed to open temporary store: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(value)) => Ok(Some(serde_json::from_slice(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(InboxError::Storage(format!("get {}: {}", key, e))),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| InboxError::Storage(format!("set {}: {}", key, e)))?;
        Ok(())
    }

    /// Returns whether the key existed
    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .db
            .remove(key.as_bytes())
            .map_err(|e| InboxError::Storage(format!("remove {}: {}", key, e)))?;
        Ok(removed.is_some())
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| InboxError::Storage(format!("Failed to flush local store: {}", e)))?;
        Ok(())
    }
}

/// Cached display fields per participant
#[derive(Clone)]
pub struct ProfileCache {
    store: LocalStore,
}

impl ProfileCache {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn get(&self, participant_id: &str) -> Result<Option<Profile>> {
        self.store.get(&profile_key(participant_id))
    }

    pub fn put(&self, profile: &Profile) -> Result<()> {
        self.store.set(&profile_key(&profile.participant_id), profile)
    }
}

fn profile_key(participant_id: &str) -> String {
    format!("{}{}", PROFILE_PREFIX, participant_id)
}
