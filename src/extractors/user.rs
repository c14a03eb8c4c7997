//! The authenticated caller. Authentication itself happens upstream; whatever runs before the
//! routes stores a [`CurrentUser`] in the request extensions.

use crate::controller::CurrentUser;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::Value;

/// Development header carrying the user id. Numeric ids are passed as numbers.
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Comma-separated role list.
pub const USER_ROLES_HEADER: &str = "X-User-Roles";

/// Extractor for the optional current user.
#[derive(Clone, Debug)]
pub struct AuthUser(pub Option<CurrentUser>);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(AuthUser(parts.extensions.get::<CurrentUser>().cloned()))
    }
}

pub fn user_from_headers(headers: &HeaderMap) -> Option<CurrentUser> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let id = match id.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(id.to_string()),
    };
    let roles = headers
        .get(USER_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Some(CurrentUser::new(id, roles))
}

/// Middleware trusting `X-User-Id` / `X-User-Roles`. Meant for development and tests.
pub async fn header_auth(mut req: Request, next: Next) -> Response {
    if let Some(user) = user_from_headers(req.headers()) {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn reads_numeric_id_and_roles() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(USER_ROLES_HEADER, HeaderValue::from_static("admin, editor,"));
        let user = user_from_headers(&headers).unwrap();
        assert_eq!(user.id, json!(42));
        assert_eq!(user.roles, vec!["admin".to_string(), "editor".to_string()]);
    }

    #[test]
    fn string_ids_and_anonymous() {
        let mut headers = HeaderMap::new();
        assert!(user_from_headers(&headers).is_none());
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u-7"));
        let user = user_from_headers(&headers).unwrap();
        assert_eq!(user.id, json!("u-7"));
        assert!(user.roles.is_empty());
    }
}
