use actix_web::web::{self, Data, Json};
use actix_web::{HttpRequest, get, post};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::WatchUser;
use crate::camera::StreamSessions;
use crate::delta::engine::DeltaEngine;
use crate::error::EdgeError;
use crate::pairing::{PairingPayload, PairingService};
use crate::types::EdgeJsonResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct EdgeStatus {
    status: String,
}

impl EdgeStatus {
    pub fn ok() -> Self {
        EdgeStatus {
            status: "OK".into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeltaFeedStatus {
    pub active_watches: usize,
    pub monitored_entities: usize,
    pub events_processed: u64,
    pub buffer_usage_percent: f64,
    pub events_per_minute: f64,
    pub camera_streams: usize,
}

#[get("/health")]
pub async fn health(_req: HttpRequest) -> EdgeJsonResult<EdgeStatus> {
    Ok(Json(EdgeStatus::ok()))
}

#[get("/status")]
pub async fn status(
    engine: Data<DeltaEngine>,
    camera_sessions: Data<StreamSessions>,
) -> EdgeJsonResult<DeltaFeedStatus> {
    let log = engine.log();
    Ok(Json(DeltaFeedStatus {
        active_watches: engine.sessions().real_session_count(),
        monitored_entities: engine.sessions().monitored_entities(),
        events_processed: log.cursor(),
        buffer_usage_percent: log.buffer_usage_percent(),
        events_per_minute: log.events_per_minute(),
        camera_streams: camera_sessions.len(),
    }))
}

/// Mint a fresh active pairing code from the configured defaults, for
/// operators onboarding a new device.
#[post("/pairing/refresh")]
pub async fn refresh_pairing(
    _user: WatchUser,
    pairing: Data<PairingService>,
) -> EdgeJsonResult<PairingPayload> {
    match pairing.refresh_active_default().await? {
        Some(payload) => Ok(Json(payload)),
        None => Err(EdgeError::PairingRejected(
            "Pairing defaults are not configured; set --external-url or --internal-url".into(),
        )),
    }
}

/// Drop every watch session, forcing clients to re-sync their entity
/// lists and take fresh snapshots on their next poll.
#[post("/force-resync")]
pub async fn force_resync(
    _user: WatchUser,
    engine: Data<DeltaEngine>,
) -> EdgeJsonResult<crate::types::StatusOk> {
    engine.sessions().clear();
    Ok(Json(crate::types::StatusOk::ok()))
}

pub fn configure_internal_backstage(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(status)
        .service(refresh_pairing)
        .service(force_resync);
}
