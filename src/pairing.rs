//! Single-use pairing codes. Each code is backed by a long-lived hub
//! refresh token created up front; redeeming the code mints an access
//! token and burns the code. Unredeemed tokens are revoked on expiry,
//! supersession and shutdown so a crashed process cannot leak
//! credentials.

use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};
use url::form_urlencoded;
use utoipa::ToSchema;

use crate::hub::{AuthService, TOKEN_TYPE_LONG_LIVED, User};
use crate::types::EdgeResult;

pub const PAIRING_CLIENT_ID: &str = "https://wrist-edge.dev/pairing";
pub const PAIRING_CLIENT_NAME_PREFIX: &str = "Wrist Edge Pairing";
pub const PAIRING_CODE_TTL_MINUTES: i64 = 10;
pub const DEFAULT_LIFESPAN_DAYS: i64 = 3650;
pub const MIN_LIFESPAN_DAYS: i64 = 1;
pub const MAX_LIFESPAN_DAYS: i64 = 36500;

const PAIRING_CODE_BYTES: usize = 32;

pub fn clamp_lifespan_days(requested: i64) -> i64 {
    requested.clamp(MIN_LIFESPAN_DAYS, MAX_LIFESPAN_DAYS)
}

#[derive(Debug, Clone)]
struct PairingSession {
    code: String,
    refresh_token_id: String,
    base_url: String,
    local_url: String,
    remote_url: String,
    expires_at: DateTime<Utc>,
    lifespan_days: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PairingPayload {
    pub pairing_code: String,
    pub pairing_uri: String,
    pub expires_at: DateTime<Utc>,
    pub lifespan_days: i64,
    pub home_assistant_url: String,
    pub local_url: String,
    pub remote_url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RedeemedCredentials {
    pub access_token: String,
    pub token_type: String,
    pub auth_mode: String,
    pub expires_in: i64,
    pub home_assistant_url: String,
    pub local_url: String,
    pub remote_url: String,
}

#[derive(Debug, Clone)]
pub struct PairingDefaults {
    pub user_id: String,
    pub base_url: String,
    pub local_url: String,
    pub remote_url: String,
    pub lifespan_days: i64,
}

pub struct PairingService {
    auth: Arc<dyn AuthService>,
    sessions: DashMap<String, PairingSession>,
    active: Mutex<Option<ActivePairing>>,
    defaults: Mutex<Option<PairingDefaults>>,
}

#[derive(Debug, Clone)]
struct ActivePairing {
    code: String,
    payload: PairingPayload,
}

impl PairingService {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        PairingService {
            auth,
            sessions: DashMap::new(),
            active: Mutex::new(None),
            defaults: Mutex::new(None),
        }
    }

    pub fn configure_defaults(&self, defaults: PairingDefaults) {
        *self.defaults.lock().unwrap() = Some(defaults);
    }

    pub fn active_payload(&self) -> Option<PairingPayload> {
        let active = self.active.lock().unwrap();
        let active = active.as_ref()?;
        self.sessions
            .contains_key(&active.code)
            .then(|| active.payload.clone())
    }

    pub async fn is_active_code(&self, code: &str) -> bool {
        if code.is_empty() {
            return false;
        }
        self.prune_expired().await;
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(current) => current.code == code && self.sessions.contains_key(code),
            None => false,
        }
    }

    /// Create a one-time code backed by a fresh long-lived refresh
    /// token, and the deep-link URI clients scan to pair.
    pub async fn create(
        &self,
        user: &User,
        base_url: &str,
        local_url: &str,
        remote_url: &str,
        lifespan_days: i64,
    ) -> EdgeResult<PairingPayload> {
        self.prune_expired().await;

        let lifespan_days = clamp_lifespan_days(lifespan_days);
        let code = generate_code();
        let client_name = format!("{PAIRING_CLIENT_NAME_PREFIX} {}", &code[..8]);
        let refresh_token = self
            .auth
            .create_refresh_token(
                user,
                PAIRING_CLIENT_ID,
                &client_name,
                TOKEN_TYPE_LONG_LIVED,
                Duration::days(lifespan_days),
            )
            .await?;
        let expires_at = Utc::now() + Duration::minutes(PAIRING_CODE_TTL_MINUTES);

        self.sessions.insert(
            code.clone(),
            PairingSession {
                code: code.clone(),
                refresh_token_id: refresh_token.id,
                base_url: base_url.to_string(),
                local_url: local_url.to_string(),
                remote_url: remote_url.to_string(),
                expires_at,
                lifespan_days,
            },
        );

        Ok(PairingPayload {
            pairing_uri: pairing_uri(&code, base_url, local_url, remote_url),
            pairing_code: code,
            expires_at,
            lifespan_days,
            home_assistant_url: base_url.to_string(),
            local_url: local_url.to_string(),
            remote_url: remote_url.to_string(),
        })
    }

    /// Create a new code, promote it to active and revoke the
    /// previously active one.
    pub async fn refresh_active(
        &self,
        user: &User,
        base_url: &str,
        local_url: &str,
        remote_url: &str,
        lifespan_days: i64,
    ) -> EdgeResult<PairingPayload> {
        let payload = self
            .create(user, base_url, local_url, remote_url, lifespan_days)
            .await?;

        let previous = {
            let mut active = self.active.lock().unwrap();
            let previous = active.as_ref().map(|a| a.code.clone());
            *active = Some(ActivePairing {
                code: payload.pairing_code.clone(),
                payload: payload.clone(),
            });
            previous
        };

        if let Some(previous_code) = previous {
            if previous_code != payload.pairing_code {
                self.revoke_code(&previous_code).await;
            }
        }
        Ok(payload)
    }

    /// Refresh the active pairing with the configured defaults, e.g.
    /// after the active code was redeemed. Returns `None` when no
    /// defaults are configured or the default user is gone.
    pub async fn refresh_active_default(&self) -> EdgeResult<Option<PairingPayload>> {
        let Some(defaults) = self.defaults.lock().unwrap().clone() else {
            return Ok(None);
        };
        let Some(user) = self.auth.get_user(&defaults.user_id).await else {
            return Ok(None);
        };
        if !user.is_active || defaults.base_url.is_empty() {
            return Ok(None);
        }
        self.refresh_active(
            &user,
            &defaults.base_url,
            &defaults.local_url,
            &defaults.remote_url,
            defaults.lifespan_days,
        )
        .await
        .map(Some)
    }

    /// Exchange a one-time code for hub credentials. Returns `None`
    /// for unknown codes and codes whose refresh token vanished. Once
    /// the access token exists this runs to completion so a usable
    /// token is never issued without being handed out.
    pub async fn redeem(
        &self,
        code: &str,
        device_name: Option<&str>,
    ) -> EdgeResult<Option<RedeemedCredentials>> {
        self.prune_expired().await;

        let Some(session) = self.sessions.get(code).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        let Some(refresh_token) = self.auth.get_refresh_token(&session.refresh_token_id).await
        else {
            self.sessions.remove(code);
            return Ok(None);
        };

        let access_token = self.auth.create_access_token(&refresh_token).await?;

        let mut expires_in = refresh_token.access_token_expiration.num_seconds();
        if expires_in <= 0 {
            expires_in = session.lifespan_days.max(1) * 86_400;
        }

        if let Some(name) = device_name {
            if !name.is_empty() {
                let renamed = format!(
                    "{} ({name})",
                    refresh_token
                        .client_name
                        .as_deref()
                        .unwrap_or(PAIRING_CLIENT_NAME_PREFIX)
                );
                self.auth
                    .set_refresh_token_name(&refresh_token.id, &renamed)
                    .await;
            }
        }

        self.sessions.remove(code);
        self.clear_active_if(code);

        Ok(Some(RedeemedCredentials {
            access_token,
            token_type: "Bearer".into(),
            auth_mode: "manual_token".into(),
            expires_in,
            home_assistant_url: session.base_url,
            local_url: session.local_url,
            remote_url: session.remote_url,
        }))
    }

    pub fn was_active_code(&self, code: &str) -> bool {
        let active = self.active.lock().unwrap();
        active.as_ref().is_some_and(|a| a.code == code)
    }

    /// Revoke and drop sessions past their expiry.
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for code in expired {
            self.revoke_code(&code).await;
        }

        let orphaned_active = {
            let active = self.active.lock().unwrap();
            active
                .as_ref()
                .map(|a| a.code.clone())
                .filter(|code| !self.sessions.contains_key(code))
        };
        if let Some(code) = orphaned_active {
            self.clear_active_if(&code);
        }
    }

    /// Revoke every outstanding session's refresh token. Runs at
    /// shutdown; best effort.
    pub async fn shutdown(&self) {
        let codes: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for code in codes {
            self.revoke_code(&code).await;
        }
        *self.active.lock().unwrap() = None;
    }

    /// Revoke pairing refresh tokens left behind by a prior crashed
    /// process: our fixed client id, our client-name prefix, never
    /// used and not in the current tracked set. Used tokens belong to
    /// paired clients and are preserved.
    pub async fn orphan_cleanup(&self) -> usize {
        let tracked: Vec<String> = self
            .sessions
            .iter()
            .map(|e| e.value().refresh_token_id.clone())
            .collect();

        let mut removed = 0;
        for user in self.auth.get_users().await {
            for token in &user.refresh_tokens {
                let name_matches = token
                    .client_name
                    .as_deref()
                    .is_some_and(|name| name.starts_with(PAIRING_CLIENT_NAME_PREFIX));
                if token.client_id == PAIRING_CLIENT_ID
                    && name_matches
                    && token.last_used_at.is_none()
                    && !tracked.contains(&token.id)
                {
                    self.auth.remove_refresh_token(&token.id).await;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Revoked {removed} orphaned pairing tokens from a previous run");
        }
        removed
    }

    async fn revoke_code(&self, code: &str) {
        let Some((_, session)) = self.sessions.remove(code) else {
            return;
        };
        if self
            .auth
            .get_refresh_token(&session.refresh_token_id)
            .await
            .is_some()
        {
            self.auth.remove_refresh_token(&session.refresh_token_id).await;
        } else {
            warn!(
                "Refresh token for pairing code {} already gone",
                &session.code[..8]
            );
        }
        self.clear_active_if(code);
    }

    fn clear_active_if(&self, code: &str) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|a| a.code == code) {
            *active = None;
        }
    }
}

fn generate_code() -> String {
    let mut bytes = [0u8; PAIRING_CODE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn pairing_uri(code: &str, base_url: &str, local_url: &str, remote_url: &str) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", code);
    query.append_pair("base_url", base_url);
    if !local_url.is_empty() {
        query.append_pair("local_url", local_url);
    }
    if !remote_url.is_empty() {
        query.append_pair("remote_url", remote_url);
    }
    format!("wristassistant://pair?{}", query.finish())
}

/// SVG served for the active pairing code. Carries the pairing URI in
/// a scannable-size canvas; QR matrix rendering is a client-side or
/// frontend concern.
pub fn pairing_svg(payload: &PairingPayload) -> String {
    format!(
        "<svg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 256 256'>\
         <rect width='256' height='256' fill='#ffffff'/>\
         <text x='128' y='128' text-anchor='middle' dominant-baseline='middle' \
         font-family='sans-serif' font-size='10' fill='#222222'>{}</text></svg>",
        svg_escape(&payload.pairing_uri)
    )
}

fn svg_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
}
