use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use actix_web::web::Json;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::error::EdgeError;
use crate::summary::InfoSummary;

pub type EdgeResult<T> = Result<T, EdgeError>;
pub type EdgeJsonResult<T> = Result<Json<T>, EdgeError>;

/// Feature set advertised to watch clients, sorted alphabetically.
pub const CAPABILITIES: &[&str] = &[
    "batch_snapshots",
    "camera_stream",
    "camera_viewport",
    "pairing",
    "push_registration",
    "slim_attributes",
    "summary",
];

pub fn capabilities() -> Vec<String> {
    CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApnsEnvironment {
    Development,
    #[default]
    Production,
}

impl Display for ApnsEnvironment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApnsEnvironment::Development => write!(f, "development"),
            ApnsEnvironment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WatchUpdatesRequest {
    pub watch_id: String,
    pub config_hash: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub slim: bool,
    #[serde(default)]
    pub force_delta: bool,
    #[serde(default)]
    pub include_summary: bool,
    #[serde(default)]
    pub battery_threshold: Option<f64>,
    #[serde(default)]
    pub summary_entities: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub apns_environment: Option<ApnsEnvironment>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UpdatesEnvelope {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<serde_json::Value>,
    pub next_cursor: String,
    pub need_entities: bool,
    pub resync_required: bool,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_summary: Option<InfoSummary>,
}

impl UpdatesEnvelope {
    pub fn new(events: Vec<serde_json::Value>, next_cursor: u64) -> Self {
        UpdatesEnvelope {
            events,
            next_cursor: next_cursor.to_string(),
            need_entities: false,
            resync_required: false,
            capabilities: capabilities(),
            info_summary: None,
        }
    }

    pub fn need_entities(next_cursor: u64) -> Self {
        UpdatesEnvelope {
            need_entities: true,
            ..UpdatesEnvelope::new(vec![], next_cursor)
        }
    }

    pub fn resync_required(next_cursor: u64) -> Self {
        UpdatesEnvelope {
            resync_required: true,
            ..UpdatesEnvelope::new(vec![], next_cursor)
        }
    }

    pub fn with_summary(mut self, summary: InfoSummary) -> Self {
        self.info_summary = Some(summary);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SummaryRequest {
    #[serde(default)]
    pub include_details: bool,
    #[serde(default)]
    pub battery_threshold: Option<f64>,
    #[serde(default)]
    pub summary_entities: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SummaryEnvelope {
    pub info_summary: InfoSummary,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NotificationRegisterRequest {
    pub watch_id: String,
    pub device_token: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub environment: Option<ApnsEnvironment>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusOk {
    pub status: String,
}

impl StatusOk {
    pub fn ok() -> Self {
        StatusOk {
            status: "ok".into(),
        }
    }
}

/// Distinguishes an absent field from an explicit `null`, used with
/// `#[serde(default, deserialize_with = "double_option")]`.
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}
