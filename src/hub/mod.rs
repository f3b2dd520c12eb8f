//! Contracts for the hub collaborators this service consumes. The hub
//! itself (state machine, auth backend, event bus, camera adapters) is
//! external; only these interfaces matter here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::EdgeResult;

pub mod memory;
pub mod value;

use value::AttrValue;

pub const TOKEN_TYPE_LONG_LIVED: &str = "long_lived_access_token";

/// Snapshot of one hub entity.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub entity_id: String,
    pub state: String,
    pub attributes: BTreeMap<String, AttrValue>,
    pub last_updated: DateTime<Utc>,
    pub context_id: Option<String>,
}

impl State {
    pub fn new(entity_id: &str, state: &str) -> Self {
        State {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: BTreeMap::new(),
            last_updated: Utc::now(),
            context_id: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Domain prefix of the entity id (`light.kitchen` -> `light`).
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }

    pub fn friendly_name(&self) -> &str {
        match self.attributes.get("friendly_name") {
            Some(AttrValue::String(name)) => name,
            _ => &self.entity_id,
        }
    }

    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        match self.attributes.get(name)? {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name)? {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Payload of one `state_changed` bus event. `new_state` of `None`
/// means the entity was removed; the delta log ignores those.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub new_state: Option<State>,
}

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: String,
    pub client_id: String,
    pub client_name: Option<String>,
    pub token_type: String,
    pub access_token_expiration: chrono::Duration,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_owner: bool,
    pub is_active: bool,
    pub refresh_tokens: Vec<RefreshToken>,
}

#[derive(Debug, Clone)]
pub struct CameraImage {
    pub content: Vec<u8>,
}

/// Read access to the hub's current entity states.
pub trait StateStore: Send + Sync {
    fn get(&self, entity_id: &str) -> Option<State>;
    fn all(&self, domain: &str) -> Vec<State>;
}

/// Subscription handle onto the hub's `state_changed` firehose.
pub trait EventBus: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}

/// The slice of the hub's auth backend the pairing service and the
/// bearer gate rely on.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn create_refresh_token(
        &self,
        user: &User,
        client_id: &str,
        client_name: &str,
        token_type: &str,
        access_token_expiration: chrono::Duration,
    ) -> EdgeResult<RefreshToken>;

    async fn get_refresh_token(&self, id: &str) -> Option<RefreshToken>;

    async fn remove_refresh_token(&self, id: &str);

    async fn set_refresh_token_name(&self, id: &str, client_name: &str);

    /// Mint an access token from a refresh token. Marks the refresh
    /// token as used.
    async fn create_access_token(&self, token: &RefreshToken) -> EdgeResult<String>;

    /// Resolve a presented bearer token to a user id.
    async fn validate_access_token(&self, access_token: &str) -> Option<String>;

    async fn get_users(&self) -> Vec<User>;

    async fn get_user(&self, id: &str) -> Option<User>;
}

#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn snapshot(&self, entity_id: &str, timeout: Duration) -> EdgeResult<CameraImage>;
}
