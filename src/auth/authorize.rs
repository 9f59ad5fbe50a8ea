//! Authoritative per-endpoint gate. Every protected API handler runs its
//! business logic inside [`authorize`]; the edge gate in `gate.rs` is only a
//! cookie-presence redirect and never replaces this check.

use std::future::Future;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::warn;

use crate::auth::{claims::Role, dto::PublicUser};
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;

/// Pulls the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingToken);
    }
    let token = parts.next().ok_or(AuthError::MissingToken)?;
    if parts.next().is_some() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Verifies the bearer token, resolves the current user and checks the role
/// before handing the user to `handler`.
pub async fn authorize<F, Fut, T>(
    state: &AppState,
    headers: &HeaderMap,
    required_roles: &[Role],
    handler: F,
) -> AuthResult<T>
where
    F: FnOnce(PublicUser) -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    let token = bearer_token(headers)?;

    let user = match state.auth.verify_session(token).await {
        Ok(user) => user,
        Err(AuthError::InvalidToken | AuthError::ExpiredToken | AuthError::UserNotFound) => {
            return Err(AuthError::Unauthorized);
        }
        Err(other) => return Err(other),
    };

    if !required_roles.contains(&user.role) {
        warn!(user_id = %user.id, role = %user.role, ?required_roles, "forbidden");
        return Err(AuthError::Forbidden);
    }

    handler(user).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn missing_or_malformed_header_is_missing_token() {
        assert!(matches!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(&headers("Basic abc")), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(&headers("Bearer")), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(&headers("Bearer a b")), Err(AuthError::MissingToken)));
    }
}
