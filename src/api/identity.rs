use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::response::ApiError;
use crate::delivery::Viewer;
use crate::policy::Tier;

/// Headers set by the authenticating gateway in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const TIER_HEADER: &str = "x-subscription-tier";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing authenticated user"))?;

        let tier = match header(parts, TIER_HEADER) {
            Some(raw) => Tier::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown subscription tier '{raw}'")))?,
            None => Tier::Free,
        };

        Ok(Viewer {
            user_id: user_id.to_string(),
            role: header(parts, USER_ROLE_HEADER).unwrap_or("student").to_string(),
            tier,
        })
    }
}
