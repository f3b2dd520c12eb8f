//! In-memory hub used by offline mode and the test suites. Holds the
//! state machine, a single-user auth backend and canned camera frames
//! behind the same contracts a live hub integration would implement.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

use crate::error::EdgeError;
use crate::hub::value::AttrValue;
use crate::hub::{
    AuthService, CameraImage, CameraSource, EventBus, RefreshToken, State, StateChange, StateStore,
    User,
};
use crate::types::EdgeResult;

const STATE_CHANGE_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Deserialize)]
struct SeedStates {
    states: Vec<SeedState>,
}

#[derive(Debug, Deserialize)]
struct SeedState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
}

pub struct MemoryHub {
    states: DashMap<String, State>,
    refresh_tokens: DashMap<String, RefreshToken>,
    access_tokens: DashMap<String, AccessTokenEntry>,
    camera_frames: DashMap<String, Vec<u8>>,
    owner: User,
    change_tx: broadcast::Sender<StateChange>,
}

#[derive(Debug, Clone)]
struct AccessTokenEntry {
    user_id: String,
    refresh_token_id: Option<String>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        let (change_tx, _rx) = broadcast::channel(STATE_CHANGE_CHANNEL_SIZE);
        Arc::new(MemoryHub {
            states: DashMap::new(),
            refresh_tokens: DashMap::new(),
            access_tokens: DashMap::new(),
            camera_frames: DashMap::new(),
            owner: User {
                id: Ulid::new().to_string(),
                name: "Owner".into(),
                is_owner: true,
                is_active: true,
                refresh_tokens: vec![],
            },
            change_tx,
        })
    }

    pub fn owner(&self) -> User {
        let mut owner = self.owner.clone();
        owner.refresh_tokens = self
            .refresh_tokens
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        owner
    }

    /// Accept a statically configured bearer token, e.g. from the
    /// `--tokens` CLI flag.
    pub fn register_static_token(&self, token: &str) {
        self.access_tokens.insert(
            token.to_string(),
            AccessTokenEntry {
                user_id: self.owner.id.clone(),
                refresh_token_id: None,
            },
        );
    }

    /// Write a state into the store and publish the change on the bus.
    pub fn set_state(&self, mut state: State) {
        state.last_updated = Utc::now();
        if state.context_id.is_none() {
            state.context_id = Some(Ulid::new().to_string());
        }
        self.states
            .insert(state.entity_id.clone(), state.clone());
        let _ = self.change_tx.send(StateChange {
            new_state: Some(state),
        });
    }

    pub fn remove_entity(&self, entity_id: &str) {
        if self.states.remove(entity_id).is_some() {
            let _ = self.change_tx.send(StateChange { new_state: None });
        }
    }

    pub fn set_camera_frame(&self, entity_id: &str, jpeg: Vec<u8>) {
        self.camera_frames.insert(entity_id.to_string(), jpeg);
    }

    pub async fn seed_from_file(&self, path: &Path) -> EdgeResult<usize> {
        let contents = tokio::fs::read(path).await.map_err(|e| {
            EdgeError::PersistenceError(format!(
                "Could not read states file {}: {e}",
                path.display()
            ))
        })?;
        let seed: SeedStates = serde_json::from_slice(&contents)
            .map_err(|e| EdgeError::PersistenceError(format!("Invalid states file: {e}")))?;
        let count = seed.states.len();
        for seeded in seed.states {
            let mut state = State::new(&seeded.entity_id, &seeded.state);
            state.attributes = seeded.attributes;
            self.set_state(state);
        }
        debug!("Seeded {count} entity states");
        Ok(count)
    }
}

impl StateStore for MemoryHub {
    fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|entry| entry.value().clone())
    }

    fn all(&self, domain: &str) -> Vec<State> {
        let prefix = format!("{domain}.");
        let mut states: Vec<State> = self
            .states
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        states
    }
}

impl EventBus for MemoryHub {
    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.change_tx.subscribe()
    }
}

#[async_trait]
impl AuthService for MemoryHub {
    async fn create_refresh_token(
        &self,
        user: &User,
        client_id: &str,
        client_name: &str,
        token_type: &str,
        access_token_expiration: chrono::Duration,
    ) -> EdgeResult<RefreshToken> {
        if user.id != self.owner.id {
            return Err(EdgeError::Internal(format!(
                "Unknown user {} for refresh token",
                user.id
            )));
        }
        let token = RefreshToken {
            id: Ulid::new().to_string(),
            client_id: client_id.to_string(),
            client_name: Some(client_name.to_string()),
            token_type: token_type.to_string(),
            access_token_expiration,
            last_used_at: None,
        };
        self.refresh_tokens.insert(token.id.clone(), token.clone());
        Ok(token)
    }

    async fn get_refresh_token(&self, id: &str) -> Option<RefreshToken> {
        self.refresh_tokens.get(id).map(|entry| entry.value().clone())
    }

    async fn remove_refresh_token(&self, id: &str) {
        self.refresh_tokens.remove(id);
        self.access_tokens
            .retain(|_, entry| entry.refresh_token_id.as_deref() != Some(id));
    }

    async fn set_refresh_token_name(&self, id: &str, client_name: &str) {
        if let Some(mut entry) = self.refresh_tokens.get_mut(id) {
            entry.client_name = Some(client_name.to_string());
        }
    }

    async fn create_access_token(&self, token: &RefreshToken) -> EdgeResult<String> {
        let mut entry = self
            .refresh_tokens
            .get_mut(&token.id)
            .ok_or_else(|| EdgeError::Internal("Refresh token vanished".into()))?;
        entry.last_used_at = Some(Utc::now());

        let access_token = Ulid::new().to_string();
        self.access_tokens.insert(
            access_token.clone(),
            AccessTokenEntry {
                user_id: self.owner.id.clone(),
                refresh_token_id: Some(token.id.clone()),
            },
        );
        Ok(access_token)
    }

    async fn validate_access_token(&self, access_token: &str) -> Option<String> {
        self.access_tokens
            .get(access_token)
            .map(|entry| entry.value().user_id.clone())
    }

    async fn get_users(&self) -> Vec<User> {
        vec![self.owner()]
    }

    async fn get_user(&self, id: &str) -> Option<User> {
        (id == self.owner.id).then(|| self.owner())
    }
}

#[async_trait]
impl CameraSource for MemoryHub {
    async fn snapshot(&self, entity_id: &str, _timeout: Duration) -> EdgeResult<CameraImage> {
        self.camera_frames
            .get(entity_id)
            .map(|entry| CameraImage {
                content: entry.value().clone(),
            })
            .ok_or_else(|| EdgeError::camera_unavailable(entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_state_publishes_on_the_bus() {
        let hub = MemoryHub::new();
        let mut rx = hub.subscribe();
        hub.set_state(State::new("light.kitchen", "on"));

        let change = rx.recv().await.unwrap();
        let state = change.new_state.unwrap();
        assert_eq!(state.entity_id, "light.kitchen");
        assert_eq!(state.state, "on");
        assert!(state.context_id.is_some());
    }

    #[tokio::test]
    async fn access_token_lifecycle() {
        let hub = MemoryHub::new();
        let owner = hub.owner();
        let refresh = hub
            .create_refresh_token(
                &owner,
                "client-id",
                "client name",
                crate::hub::TOKEN_TYPE_LONG_LIVED,
                chrono::Duration::days(10),
            )
            .await
            .unwrap();
        assert!(refresh.last_used_at.is_none());

        let access = hub.create_access_token(&refresh).await.unwrap();
        assert!(hub.validate_access_token(&access).await.is_some());
        assert!(
            hub.get_refresh_token(&refresh.id)
                .await
                .unwrap()
                .last_used_at
                .is_some()
        );

        hub.remove_refresh_token(&refresh.id).await;
        assert!(hub.validate_access_token(&access).await.is_none());
    }

    #[tokio::test]
    async fn static_tokens_validate_without_refresh_backing() {
        let hub = MemoryHub::new();
        hub.register_static_token("secret");
        assert!(hub.validate_access_token("secret").await.is_some());
        assert!(hub.validate_access_token("other").await.is_none());
    }

    #[test]
    fn all_filters_by_domain_prefix() {
        let hub = MemoryHub::new();
        hub.set_state(State::new("light.kitchen", "on"));
        hub.set_state(State::new("light.hall", "off"));
        hub.set_state(State::new("lightning.sensor", "4"));

        let lights = hub.all("light");
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].entity_id, "light.hall");
    }
}
