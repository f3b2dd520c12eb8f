use actix_web::web::{self, Data, Json};
use actix_web::{HttpResponse, post};
use tracing::instrument;

use crate::auth::WatchUser;
use crate::delta::engine::{DeltaEngine, PollOutcome, PollRequest, clamp_timeout};
use crate::error::EdgeError;
use crate::hub::StateStore;
use crate::push_tokens::PushTokenStore;
use crate::summary::{self, SummaryOptions};
use crate::types::{
    EdgeJsonResult, EdgeResult, NotificationRegisterRequest, StatusOk, SummaryEnvelope,
    SummaryRequest, UpdatesEnvelope, WatchUpdatesRequest, capabilities,
};

#[utoipa::path(
    context_path = "/api",
    request_body = WatchUpdatesRequest,
    responses(
        (status = 200, description = "Delta events, a snapshot, or a request to resend the entity list", body = UpdatesEnvelope),
        (status = 204, description = "Long-poll timeout, nothing to deliver"),
        (status = 400, description = "Invalid request body"),
        (status = 410, description = "Stale cursor, client must resync", body = UpdatesEnvelope)
    ),
    security(
        ("Authorization" = [])
    )
)]
#[post("/watch/updates")]
#[instrument(skip_all, fields(watch_id = %body.watch_id))]
pub async fn watch_updates(
    _user: WatchUser,
    engine: Data<DeltaEngine>,
    states: Data<dyn StateStore>,
    push_tokens: Data<PushTokenStore>,
    body: Json<WatchUpdatesRequest>,
) -> EdgeResult<HttpResponse> {
    let req = body.into_inner();
    if req.watch_id.is_empty() {
        return Err(EdgeError::InvalidBody("watch_id is required".into()));
    }
    if req.config_hash.is_empty() {
        return Err(EdgeError::InvalidBody("config_hash is required".into()));
    }

    // Piggyback push-token registration so clients skip a round trip.
    if let Some(device_token) = req.device_token.as_deref() {
        if !device_token.is_empty() {
            push_tokens.register(
                &req.watch_id,
                device_token,
                "watchos",
                req.apns_environment.unwrap_or_default(),
            );
        }
    }

    let include_summary = req.include_summary || req.force_delta;
    let summary_opts = SummaryOptions::new(
        true,
        req.battery_threshold,
        req.summary_entities.clone(),
    );

    let outcome = engine
        .handle_poll(PollRequest {
            watch_id: req.watch_id.clone(),
            config_hash: req.config_hash.clone(),
            since: req.since.clone(),
            entities: req.entities.clone(),
            timeout: clamp_timeout(req.timeout),
            slim: req.slim,
            force_delta: req.force_delta,
        })
        .await;

    let envelope = match outcome {
        PollOutcome::Timeout => return Ok(HttpResponse::NoContent().finish()),
        PollOutcome::StaleCursor { next_cursor } => {
            return Ok(HttpResponse::Gone().json(UpdatesEnvelope::resync_required(next_cursor)));
        }
        PollOutcome::NeedEntities { next_cursor } => UpdatesEnvelope::need_entities(next_cursor),
        PollOutcome::Snapshot { events, next_cursor }
        | PollOutcome::Delivered { events, next_cursor } => {
            UpdatesEnvelope::new(events, next_cursor)
        }
        PollOutcome::ForceDelta { next_cursor } => UpdatesEnvelope::new(vec![], next_cursor),
    };

    let envelope = if include_summary {
        envelope.with_summary(summary::project(states.as_ref(), &summary_opts))
    } else {
        envelope
    };
    Ok(HttpResponse::Ok().json(envelope))
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    request_body = SummaryRequest,
    responses(
        (status = 200, description = "Aggregate view over the tracked domains", body = SummaryEnvelope),
        (status = 400, description = "Invalid request body")
    ),
    security(
        ("Authorization" = [])
    )
)]
#[post("/wrist_assistant/summary")]
pub async fn wrist_summary(
    _user: WatchUser,
    states: Data<dyn StateStore>,
    body: Json<SummaryRequest>,
) -> EdgeJsonResult<SummaryEnvelope> {
    let req = body.into_inner();
    let opts = SummaryOptions::new(
        req.include_details,
        req.battery_threshold,
        req.summary_entities,
    );
    Ok(Json(SummaryEnvelope {
        info_summary: summary::project(states.as_ref(), &opts),
        capabilities: capabilities(),
    }))
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    request_body = NotificationRegisterRequest,
    responses(
        (status = 200, description = "Token registered", body = StatusOk),
        (status = 400, description = "Invalid request body")
    ),
    security(
        ("Authorization" = [])
    )
)]
#[post("/wrist_assistant/notifications/register")]
pub async fn register_push_token(
    _user: WatchUser,
    push_tokens: Data<PushTokenStore>,
    body: Json<NotificationRegisterRequest>,
) -> EdgeJsonResult<StatusOk> {
    let req = body.into_inner();
    if req.watch_id.is_empty() {
        return Err(EdgeError::InvalidBody("watch_id is required".into()));
    }
    if req.device_token.is_empty() {
        return Err(EdgeError::InvalidBody("device_token is required".into()));
    }
    push_tokens.register(
        &req.watch_id,
        &req.device_token,
        req.platform.as_deref().unwrap_or("watchos"),
        req.environment.unwrap_or_default(),
    );
    Ok(Json(StatusOk::ok()))
}

pub fn configure_watch_api(cfg: &mut web::ServiceConfig) {
    cfg.service(watch_updates)
        .service(wrist_summary)
        .service(register_push_token);
}
