//! Caller identity from the headers set by the upstream authenticating proxy.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::response::ApiError;
use crate::session::Caller;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let id = header_value(headers, USER_ID_HEADER)
        .ok_or_else(|| ApiError::unauthorized("Missing authenticated user id"))?;
    let email = header_value(headers, USER_EMAIL_HEADER)
        .ok_or_else(|| ApiError::unauthorized("Missing authenticated user email"))?;

    Ok(Caller {
        id: id.to_string(),
        email: email.to_string(),
        name: header_value(headers, USER_NAME_HEADER).map(str::to_string),
    })
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        caller_from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn reads_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("alice@example.com"));

        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller.id, "42");
        assert_eq!(caller.email, "alice@example.com");
        assert_eq!(caller.name, None);
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));

        let err = caller_from_headers(&headers).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
