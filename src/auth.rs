use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use crate::error::EdgeError;
use crate::hub::AuthService;
use crate::types::EdgeResult;

/// Authenticated caller, resolved from the bearer token by the hub's
/// auth backend. Extracting this gates a handler; everything except
/// pairing redemption and the QR image requires it.
#[derive(Debug, Clone)]
pub struct WatchUser {
    pub user_id: String,
}

impl FromRequest for WatchUser {
    type Error = EdgeError;
    type Future = LocalBoxFuture<'static, EdgeResult<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let auth = req.app_data::<Data<dyn AuthService>>().cloned();
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Box::pin(async move {
            let auth =
                auth.ok_or_else(|| EdgeError::Internal("Auth service not configured".into()))?;
            let header = header.ok_or(EdgeError::AuthorizationDenied)?;
            let token = header
                .strip_prefix("Bearer ")
                .ok_or(EdgeError::AuthorizationDenied)?;
            match auth.validate_access_token(token).await {
                Some(user_id) => Ok(WatchUser { user_id }),
                None => Err(EdgeError::AuthorizationDenied),
            }
        })
    }
}
