use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::warn;

/// Вызов от платёжной подсистемы, прошедший Basic-авторизацию
/// служебной учёткой из `SalesConfig`.
#[derive(Debug, Clone)]
pub struct SalesCaller {
    pub name: String,
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, password) = credentials.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

// Basic Auth extractor для подтверждений продаж
impl FromRequestParts<Arc<crate::AppState>> for SalesCaller {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let (user, password) = decode_basic(header_value).ok_or(StatusCode::UNAUTHORIZED)?;

        let expected = &state.config.sales;
        if user != expected.webhook_user || password != expected.webhook_password {
            warn!("Rejected sale confirmation from {:?}", user);
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(SalesCaller { name: user })
    }
}
