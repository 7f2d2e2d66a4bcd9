use crate::domain::models::{AlarmCollections, WrappedAlarm};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const RUNNING_KEY: &str = "alarms.running";
pub const RECENT_KEY: &str = "alarms.recent";
const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredAlarms {
    schema: u8,
    alarms: Vec<WrappedAlarm>,
}

/// Write-through persistence of the running and recent collections.
pub struct AlarmCollectionStore<S>
where
    S: KeyValueStore + ?Sized,
{
    store: Arc<S>,
}

impl<S> AlarmCollectionStore<S>
where
    S: KeyValueStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Never fails: unreadable blobs load as empty collections.
    pub fn load(&self) -> AlarmCollections {
        AlarmCollections {
            running: self.load_key(RUNNING_KEY),
            recent: self.load_key(RECENT_KEY),
        }
    }

    pub fn save(&self, collections: &AlarmCollections) -> Result<(), InfraError> {
        self.save_key(RUNNING_KEY, &collections.running)?;
        self.save_key(RECENT_KEY, &collections.recent)
    }

    fn load_key(&self, key: &str) -> Vec<WrappedAlarm> {
        match self.read_key(key) {
            Ok(alarms) => alarms,
            Err(error) => {
                tracing::warn!(key, %error, "discarding unreadable persisted alarms");
                Vec::new()
            }
        }
    }

    fn read_key(&self, key: &str) -> Result<Vec<WrappedAlarm>, InfraError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(Vec::new());
        };
        let stored: StoredAlarms = serde_json::from_str(&raw)?;
        if stored.schema != SCHEMA_VERSION {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported schema {} for {key}",
                stored.schema
            )));
        }
        Ok(stored.alarms)
    }

    fn save_key(&self, key: &str, alarms: &[WrappedAlarm]) -> Result<(), InfraError> {
        let payload = serde_json::to_string(&StoredAlarms {
            schema: SCHEMA_VERSION,
            alarms: alarms.to_vec(),
        })?;
        self.store.put(key, &payload)
    }
}
