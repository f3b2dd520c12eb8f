use actix_web::web::{self, Data, Json, Query};
use actix_web::{HttpResponse, get, post};
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::EdgeError;
use crate::pairing::{PairingService, RedeemedCredentials, pairing_svg};
use crate::types::EdgeResult;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub pairing_code: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct QrQuery {
    #[serde(default)]
    pub code: Option<String>,
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Hub credentials for the paired device", body = RedeemedCredentials),
        (status = 400, description = "Unknown, expired or already redeemed code")
    )
)]
#[post("/wrist_assistant/pairing/redeem")]
pub async fn redeem_pairing_code(
    pairing: Data<PairingService>,
    body: Json<RedeemRequest>,
) -> EdgeResult<HttpResponse> {
    let req = body.into_inner();
    if req.pairing_code.is_empty() {
        return Err(EdgeError::InvalidBody("pairing_code is required".into()));
    }
    let code_hint: String = req.pairing_code.chars().take(8).collect();
    info!("Pairing redeem request code={code_hint}");

    let was_active = pairing.was_active_code(&req.pairing_code);
    let credentials = pairing
        .redeem(&req.pairing_code, req.device_name.as_deref())
        .await
        .map_err(|e| {
            error!("Pairing redemption failed for code={code_hint}: {e}");
            EdgeError::Internal("Internal pairing redemption error".into())
        })?;

    let Some(credentials) = credentials else {
        warn!("Pairing code invalid/expired code={code_hint}");
        return Err(EdgeError::PairingRejected(
            "Invalid or expired pairing code".into(),
        ));
    };
    info!("Pairing redeem success code={code_hint}");

    // The active QR just got consumed; mint a replacement so the next
    // device can pair without operator action.
    if was_active {
        let pairing = pairing.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = pairing.refresh_active_default().await {
                error!("Failed to refresh active pairing after redeem: {e}");
            }
        });
    }

    Ok(HttpResponse::Ok().json(credentials))
}

#[utoipa::path(
    context_path = "/api/wrist_assistant",
    params(QrQuery),
    responses(
        (status = 200, description = "SVG for the active pairing code", content_type = "image/svg+xml"),
        (status = 404, description = "Code is not the active pairing code")
    )
)]
#[get("/wrist_assistant/pairing/qr.svg")]
pub async fn pairing_qr_svg(
    pairing: Data<PairingService>,
    query: Query<QrQuery>,
) -> HttpResponse {
    // The image is fetched by plain <img> tags with no auth headers;
    // knowing the active one-time code is the gate.
    let code = query.code.as_deref().unwrap_or_default();
    if !pairing.is_active_code(code).await {
        return HttpResponse::NotFound().finish();
    }
    let Some(payload) = pairing.active_payload() else {
        return HttpResponse::NotFound().finish();
    };
    HttpResponse::Ok()
        .content_type("image/svg+xml")
        .insert_header(("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"))
        .insert_header(("Pragma", "no-cache"))
        .body(pairing_svg(&payload))
}

pub fn configure_pairing_api(cfg: &mut web::ServiceConfig) {
    cfg.service(redeem_pairing_code).service(pairing_qr_svg);
}
