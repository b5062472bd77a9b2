//! Request extractors

use crate::error::ApiError;
use atmo_types::UserRef;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::str::FromStr;

/// Header carrying the authenticated user's email, set by the front end
pub const USER_HEADER: &str = "x-atmo-user";

/// The user a request acts on behalf of
#[derive(Debug, Clone)]
pub struct ActingUser(pub UserRef);

#[async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", USER_HEADER)))?;

        if !email.contains('@') {
            return Err(ApiError::Unauthorized(format!(
                "{} is not an email address",
                email
            )));
        }
        Ok(ActingUser(UserRef::new(email)))
    }
}

/// Parse a path segment into a typed id
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} ID: {}", what, raw)))
}
