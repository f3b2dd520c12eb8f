//! Store of watch id -> push device token, persisted to a JSON file
//! with delayed saves so bursts of registrations coalesce into one
//! write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EdgeError;
use crate::types::{ApnsEnvironment, EdgeResult};

pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub device_token: String,
    pub platform: String,
    pub environment: ApnsEnvironment,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTokens {
    tokens: HashMap<String, TokenEntry>,
}

pub struct PushTokenStore {
    tokens: DashMap<String, TokenEntry>,
    storage_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl PushTokenStore {
    pub fn new(storage_path: Option<PathBuf>) -> Self {
        PushTokenStore {
            tokens: DashMap::new(),
            storage_path,
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn load(&self) -> EdgeResult<usize> {
        let Some(path) = &self.storage_path else {
            return Ok(0);
        };
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(EdgeError::PersistenceError(format!(
                    "Cannot load push tokens from {}: {e}",
                    path.display()
                )));
            }
        };
        let stored: StoredTokens = serde_json::from_slice(&contents).map_err(|e| {
            EdgeError::PersistenceError(format!("Cannot parse push token store: {e}"))
        })?;
        let count = stored.tokens.len();
        for (watch_id, entry) in stored.tokens {
            self.tokens.insert(watch_id, entry);
        }
        debug!("Loaded {count} push tokens from storage");
        Ok(count)
    }

    /// Store or update a device token. Re-registering an unchanged
    /// (token, environment) pair is a no-op and does not dirty the
    /// store.
    pub fn register(
        &self,
        watch_id: &str,
        device_token: &str,
        platform: &str,
        environment: ApnsEnvironment,
    ) {
        if let Some(existing) = self.tokens.get(watch_id) {
            if existing.device_token == device_token && existing.environment == environment {
                return;
            }
        }
        self.tokens.insert(
            watch_id.to_string(),
            TokenEntry {
                device_token: device_token.to_string(),
                platform: platform.to_string(),
                environment,
            },
        );
        info!(
            "Registered push token for watch_id={watch_id} (platform={platform}, environment={environment})"
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn get(&self, watch_id: &str) -> Option<TokenEntry> {
        self.tokens.get(watch_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, watch_id: &str) {
        if self.tokens.remove(watch_id).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn all(&self) -> HashMap<String, TokenEntry> {
        self.tokens
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the store to disk if anything changed since the last
    /// save.
    pub async fn flush(&self) -> EdgeResult<()> {
        let Some(path) = &self.storage_path else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let stored = StoredTokens {
            tokens: self.all(),
        };
        let serialized = serde_json::to_vec_pretty(&stored)
            .map_err(|e| EdgeError::PersistenceError(format!("Failed to serialize push tokens: {e}")))?;
        tokio::fs::write(path, serialized).await.map_err(|e| {
            EdgeError::PersistenceError(format!(
                "Could not write push tokens to {}: {e}",
                path.display()
            ))
        })?;
        debug!("Persisted {} push tokens", self.tokens.len());
        Ok(())
    }

    /// Debounced save loop; select this against the server future.
    pub async fn run_flush_loop(&self) {
        let mut interval = tokio::time::interval(SAVE_DEBOUNCE);
        loop {
            interval.tick().await;
            if let Err(e) = self.flush().await {
                tracing::error!("Failed to persist push tokens: {e}");
            }
        }
    }
}
