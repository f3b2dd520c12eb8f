//! Forwarding path to the external push gateway. The gateway itself
//! lives outside this service; what matters here is routing a message
//! to the right token and dropping tokens the gateway reports as
//! permanently dead.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::push_tokens::{PushTokenStore, TokenEntry};

/// Gateway rejection reasons that mean the token will never work
/// again.
pub const DEAD_TOKEN_REASONS: &[&str] =
    &["BadDeviceToken", "DeviceTokenNotForTopic", "Unregistered"];

pub fn is_dead_token(reason: &str) -> bool {
    DEAD_TOKEN_REASONS.contains(&reason)
}

#[derive(Debug, Clone)]
pub struct PushError {
    pub reason: String,
}

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Push gateway rejected send: {}", self.reason)
    }
}

impl std::error::Error for PushError {}

#[derive(Debug, Clone, Default)]
pub struct PushMessage {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub data: Option<Value>,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, entry: &TokenEntry, message: &PushMessage) -> Result<(), PushError>;
}

/// Outcome of one forward attempt, mostly for callers that batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardResult {
    Sent,
    NoToken,
    TokenDropped,
    Failed,
}

/// Forward a message to the token registered for a watch. Dead tokens
/// are pruned from the store; transient failures are logged and
/// swallowed so batches keep going.
pub async fn forward_to_watch(
    store: &PushTokenStore,
    gateway: &dyn PushGateway,
    watch_id: &str,
    message: &PushMessage,
) -> ForwardResult {
    let Some(entry) = store.get(watch_id) else {
        debug!("No push token registered for watch_id={watch_id}");
        return ForwardResult::NoToken;
    };

    match gateway.send(&entry, message).await {
        Ok(()) => {
            debug!("Forwarded push to watch_id={watch_id}");
            ForwardResult::Sent
        }
        Err(e) if is_dead_token(&e.reason) => {
            info!(
                "Dropping dead push token for watch_id={watch_id} (reason: {})",
                e.reason
            );
            store.remove(watch_id);
            ForwardResult::TokenDropped
        }
        Err(e) => {
            warn!("Push forward failed for watch_id={watch_id}: {e}");
            ForwardResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::ApnsEnvironment;

    struct ScriptedGateway {
        responses: Mutex<Vec<Result<(), PushError>>>,
        sent_to: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(responses: Vec<Result<(), PushError>>) -> Self {
            ScriptedGateway {
                responses: Mutex::new(responses),
                sent_to: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl PushGateway for ScriptedGateway {
        async fn send(&self, entry: &TokenEntry, _message: &PushMessage) -> Result<(), PushError> {
            self.sent_to.lock().unwrap().push(entry.device_token.clone());
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn store_with_token(watch_id: &str) -> PushTokenStore {
        let store = PushTokenStore::new(None);
        store.register(watch_id, "tok-1", "watchos", ApnsEnvironment::Production);
        store
    }

    #[tokio::test]
    async fn successful_forward_keeps_the_token() {
        let store = store_with_token("w1");
        let gateway = ScriptedGateway::new(vec![Ok(())]);
        let result = forward_to_watch(&store, &gateway, "w1", &PushMessage::default()).await;
        assert_eq!(result, ForwardResult::Sent);
        assert!(store.get("w1").is_some());
    }

    #[tokio::test]
    async fn dead_token_is_dropped() {
        let store = store_with_token("w1");
        let gateway = ScriptedGateway::new(vec![Err(PushError {
            reason: "Unregistered".into(),
        })]);
        let result = forward_to_watch(&store, &gateway, "w1", &PushMessage::default()).await;
        assert_eq!(result, ForwardResult::TokenDropped);
        assert!(store.get("w1").is_none());
    }

    #[tokio::test]
    async fn transient_failure_keeps_the_token() {
        let store = store_with_token("w1");
        let gateway = ScriptedGateway::new(vec![Err(PushError {
            reason: "TooManyRequests".into(),
        })]);
        let result = forward_to_watch(&store, &gateway, "w1", &PushMessage::default()).await;
        assert_eq!(result, ForwardResult::Failed);
        assert!(store.get("w1").is_some());
    }

    #[tokio::test]
    async fn unknown_watch_sends_nothing() {
        let store = PushTokenStore::new(None);
        let gateway = ScriptedGateway::new(vec![]);
        let result = forward_to_watch(&store, &gateway, "w1", &PushMessage::default()).await;
        assert_eq!(result, ForwardResult::NoToken);
        assert!(gateway.sent_to.lock().unwrap().is_empty());
    }

    #[test]
    fn dead_token_reason_table() {
        assert!(is_dead_token("BadDeviceToken"));
        assert!(is_dead_token("Unregistered"));
        assert!(!is_dead_token("connection_error"));
    }
}
