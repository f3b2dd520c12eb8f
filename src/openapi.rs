use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::watch_api::watch_updates,
        crate::watch_api::wrist_summary,
        crate::watch_api::register_push_token,
        crate::pairing_api::redeem_pairing_code,
        crate::pairing_api::pairing_qr_svg,
        crate::camera_api::camera_stream,
        crate::camera_api::camera_viewport,
        crate::camera_api::camera_batch
    ),
    components(schemas(
        crate::types::WatchUpdatesRequest,
        crate::types::UpdatesEnvelope,
        crate::types::SummaryRequest,
        crate::types::SummaryEnvelope,
        crate::types::NotificationRegisterRequest,
        crate::types::ApnsEnvironment,
        crate::types::StatusOk,
        crate::summary::InfoSummary,
        crate::summary::DomainSummary,
        crate::summary::EntityDetail,
        crate::pairing::PairingPayload,
        crate::pairing::RedeemedCredentials,
        crate::pairing_api::RedeemRequest,
        crate::camera_api::ViewportRequest,
        crate::camera_api::BatchRequest,
        crate::camera_api::BatchSpec,
        crate::camera_api::BatchSnapshot,
        crate::camera_api::BatchResponse
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "Authorization",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
        )
    }
}
