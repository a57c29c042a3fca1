//! Access check for the webhook route.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::ListenerState;

/// Proof that the request carried the configured webhook token.
///
/// The raw `Authorization` header value is compared with the stored token by
/// plain equality; no scheme prefix is parsed. A missing header, a header that
/// is not visible ASCII, or an unconfigured token all deny access.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl FromRequestParts<ListenerState> for Authorized {
    type Rejection = ApiError;

    #[tracing::instrument(level = "debug", name = "extract.authorized", skip_all)]
    async fn from_request_parts(
        parts: &mut Parts,
        state: &ListenerState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let expected = state
            .settings
            .expected_token()
            .await
            .map_err(ApiError::Settings)?;

        match (presented, expected) {
            (Some(presented), Some(expected)) if presented == expected => Ok(Authorized),
            _ => Err(ApiError::AccessDenied),
        }
    }
}
