use std::convert::Infallible;
use std::time::Duration;

use actix_web::http::header::ContentEncoding;
use actix_web::web::{self, Bytes, Data, Json, Path, Query};
use actix_web::{HttpResponse, get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::WatchUser;
use crate::camera::frame::process_frame;
use crate::camera::{
    DEFAULT_FPS, DEFAULT_QUALITY, DEFAULT_WIDTH, MAX_BATCH_CAMERAS, OVERRIDE_FAILURE_LIMIT,
    SNAPSHOT_TIMEOUT, SourceUpdate, StreamSessions, StreamUpdate, Viewport, clamp_fps,
    clamp_quality, clamp_width,
};
use crate::error::EdgeError;
use crate::hub::{CameraSource, StateStore};
use crate::types::{EdgeJsonResult, EdgeResult, StatusOk, double_option};

#[derive(Debug, Deserialize, IntoParams)]
pub struct StreamQuery {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub watch_id: Option<String>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub w: Option<f32>,
    #[serde(default)]
    pub h: Option<f32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ViewportRequest {
    pub watch_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub w: Option<f32>,
    #[serde(default)]
    pub h: Option<f32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub fps: Option<f32>,
    /// Absent leaves the override alone; `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub source_entity_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchRequest {
    pub cameras: Vec<BatchSpec>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchSpec {
    pub entity_id: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchSnapshot {
    pub entity_id: String,
    pub data: Option<String>,
    pub size: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub snapshots: Vec<BatchSnapshot>,
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    params(StreamQuery),
    responses(
        (status = 200, description = "Motion-JPEG stream", content_type = "multipart/x-mixed-replace"),
        (status = 404, description = "Entity is not a known camera")
    ),
    security(
        ("Authorization" = [])
    )
)]
#[get("/wrist_assistant/camera/stream/{entity_id}")]
pub async fn camera_stream(
    _user: WatchUser,
    path: Path<String>,
    query: Query<StreamQuery>,
    states: Data<dyn StateStore>,
    camera: Data<dyn CameraSource>,
    sessions: Data<StreamSessions>,
) -> EdgeResult<HttpResponse> {
    let entity_id = path.into_inner();
    if !entity_id.starts_with("camera.") || states.get(&entity_id).is_none() {
        return Err(EdgeError::NotFound(format!("Camera {entity_id}")));
    }

    let query = query.into_inner();
    let width = clamp_width(query.width.unwrap_or(DEFAULT_WIDTH));
    let quality = clamp_quality(query.quality.unwrap_or(DEFAULT_QUALITY));
    let fps = clamp_fps(query.fps.unwrap_or(DEFAULT_FPS));
    let watch_id = query.watch_id.unwrap_or_else(|| "unknown".into());

    let viewport = if [query.x, query.y, query.w, query.h].iter().any(Option::is_some) {
        Viewport::clamped(
            query.x.unwrap_or(0.0),
            query.y.unwrap_or(0.0),
            query.w.unwrap_or(1.0),
            query.h.unwrap_or(1.0),
        )
    } else {
        Viewport::default()
    };

    sessions.open(&watch_id, &entity_id, width, quality, fps, viewport);

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(2);
    actix_web::rt::spawn(frame_loop(
        sessions.clone(),
        camera.clone(),
        watch_id,
        entity_id,
        tx,
    ));

    // Identity encoding keeps the compress middleware from buffering
    // the frame boundary flushes.
    Ok(HttpResponse::Ok()
        .content_type("multipart/x-mixed-replace; boundary=frame")
        .insert_header(ContentEncoding::Identity)
        .insert_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .insert_header(("Pragma", "no-cache"))
        .streaming(ReceiverStream::new(rx)))
}

/// Per-stream frame loop. Reads the live session on every iteration so
/// viewport-control updates take effect by the next frame. Transport
/// errors skip the frame; only a closed client or a removed session
/// ends the stream.
async fn frame_loop(
    sessions: Data<StreamSessions>,
    camera: Data<dyn CameraSource>,
    watch_id: String,
    entity_id: String,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let mut consecutive_source_errors: u32 = 0;

    loop {
        let Some(session) = sessions.current(&watch_id, &entity_id) else {
            break;
        };
        let fetch_entity = session
            .source_entity_id
            .clone()
            .unwrap_or_else(|| entity_id.clone());
        let frame_interval = Duration::from_secs_f32(1.0 / session.fps);

        match camera.snapshot(&fetch_entity, SNAPSHOT_TIMEOUT).await {
            Ok(image) => {
                let viewport = session.viewport;
                let (width, quality) = (session.width, session.quality);
                let processed = web::block(move || {
                    process_frame(&image.content, viewport, width, quality)
                })
                .await;
                match processed {
                    Ok(Ok(jpeg)) => {
                        if tx.send(Ok(frame_part(&jpeg))).await.is_err() {
                            // Client hung up.
                            break;
                        }
                        consecutive_source_errors = 0;
                    }
                    Ok(Err(e)) => {
                        debug!("Frame error for {fetch_entity}, continuing: {e}");
                        if fetch_entity != entity_id {
                            consecutive_source_errors += 1;
                        }
                    }
                    Err(_) => break,
                }
            }
            Err(e) => {
                debug!("Camera unavailable for {fetch_entity}, retrying: {e}");
                if fetch_entity != entity_id {
                    consecutive_source_errors += 1;
                }
            }
        }

        // Persistent failure of an override means the override is bad,
        // not that the camera is down; fall back to the original.
        if consecutive_source_errors >= OVERRIDE_FAILURE_LIMIT {
            warn!(
                "Reverting source override for {entity_id} after {consecutive_source_errors} failures (was {fetch_entity})"
            );
            sessions.clear_source_override(&watch_id, &entity_id);
            consecutive_source_errors = 0;
        }

        tokio::time::sleep(frame_interval).await;
    }

    sessions.remove(&watch_id, &entity_id);
    debug!("Camera stream ended for {entity_id} (watch: {watch_id})");
}

fn frame_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 96);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
    part.extend_from_slice(jpeg.len().to_string().as_bytes());
    part.extend_from_slice(b"\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    request_body = ViewportRequest,
    responses(
        (status = 200, description = "Session updated", body = StatusOk),
        (status = 400, description = "Invalid parameters"),
        (status = 404, description = "No active stream for this session")
    ),
    security(
        ("Authorization" = [])
    )
)]
#[post("/wrist_assistant/camera/viewport")]
pub async fn camera_viewport(
    _user: WatchUser,
    states: Data<dyn StateStore>,
    sessions: Data<StreamSessions>,
    body: Json<ViewportRequest>,
) -> EdgeJsonResult<StatusOk> {
    let req = body.into_inner();
    if req.watch_id.is_empty() || req.entity_id.is_empty() {
        return Err(EdgeError::InvalidBody(
            "entity_id and watch_id required".into(),
        ));
    }

    let viewport = if [req.x, req.y, req.w, req.h].iter().any(Option::is_some) {
        Some(Viewport::clamped(
            req.x.unwrap_or(0.0),
            req.y.unwrap_or(0.0),
            req.w.unwrap_or(1.0),
            req.h.unwrap_or(1.0),
        ))
    } else {
        None
    };

    let source = match req.source_entity_id {
        None => SourceUpdate::Keep,
        Some(None) => SourceUpdate::Clear,
        Some(Some(source_id)) => {
            if !source_id.starts_with("camera.") {
                return Err(EdgeError::InvalidBody(
                    "source_entity_id must start with camera.".into(),
                ));
            }
            if states.get(&source_id).is_none() {
                return Err(EdgeError::NotFound(format!("Entity {source_id}")));
            }
            SourceUpdate::Set(source_id)
        }
    };

    let updated = sessions.update(
        &req.watch_id,
        &req.entity_id,
        StreamUpdate {
            viewport,
            width: req.width,
            quality: req.quality,
            fps: req.fps,
            source,
        },
    );
    if updated {
        Ok(Json(StatusOk::ok()))
    } else {
        Err(EdgeError::NotFound("Active stream for this session".into()))
    }
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Base64 snapshots; failed cameras carry null data", body = BatchResponse),
        (status = 400, description = "Invalid request body")
    ),
    security(
        ("Authorization" = [])
    )
)]
#[post("/wrist_assistant/camera/batch")]
pub async fn camera_batch(
    _user: WatchUser,
    camera: Data<dyn CameraSource>,
    body: Json<BatchRequest>,
) -> EdgeJsonResult<BatchResponse> {
    let mut cameras = body.into_inner().cameras;
    if cameras.is_empty() {
        return Err(EdgeError::InvalidBody("cameras array is required".into()));
    }
    cameras.truncate(MAX_BATCH_CAMERAS);

    let fetches = cameras
        .into_iter()
        .filter(|spec| spec.entity_id.starts_with("camera."))
        .map(|spec| batch_snapshot(camera.clone(), spec));
    let snapshots = join_all(fetches).await;

    Ok(Json(BatchResponse { snapshots }))
}

async fn batch_snapshot(camera: Data<dyn CameraSource>, spec: BatchSpec) -> BatchSnapshot {
    let width = clamp_width(spec.width.unwrap_or(DEFAULT_WIDTH));
    let quality = clamp_quality(spec.quality.unwrap_or(DEFAULT_QUALITY));
    let entity_id = spec.entity_id;

    let failed = |entity_id: String| BatchSnapshot {
        entity_id,
        data: None,
        size: 0,
    };

    let image = match camera.snapshot(&entity_id, SNAPSHOT_TIMEOUT).await {
        Ok(image) => image,
        Err(e) => {
            debug!("Batch snapshot failed for {entity_id}: {e}");
            return failed(entity_id);
        }
    };

    match web::block(move || process_frame(&image.content, Viewport::default(), width, quality))
        .await
    {
        Ok(Ok(jpeg)) => BatchSnapshot {
            entity_id,
            data: Some(STANDARD.encode(&jpeg)),
            size: jpeg.len(),
        },
        Ok(Err(e)) => {
            debug!("Batch snapshot failed for {entity_id}: {e}");
            failed(entity_id)
        }
        Err(e) => {
            debug!("Batch snapshot worker failed for {entity_id}: {e}");
            failed(entity_id)
        }
    }
}

pub fn configure_camera_api(cfg: &mut web::ServiceConfig) {
    cfg.service(camera_stream)
        .service(camera_viewport)
        .service(camera_batch);
}
