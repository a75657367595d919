//! Bearer-token authorization for write endpoints.
//!
//! The model is a flat map from opaque bearer tokens to usernames:
//! membership grants write access, the username only annotates the
//! upload records.

use axum::extract::{Extension, Request};
use axum::http::{header, HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::Authorization;
use crate::error::ServerError;
use crate::State;

/// Username of an authorized uploader, attached to the request by
/// [`apply_write_auth`].
#[derive(Debug, Clone)]
pub struct Uploader(pub String);

/// Extracts the token from an `Authorization` header value.
///
/// The value is split at the first whitespace and both sides are
/// trimmed; the scheme must be exactly `Bearer` and the token must be
/// non-empty.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(char::is_whitespace)?;
    let token = token.trim();
    (scheme.trim() == "Bearer" && !token.is_empty()).then_some(token)
}

/// Username to record for a request, `?` without valid credentials.
pub fn request_user(auth: &Authorization, headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .and_then(|token| auth.write.get(token).cloned())
        .unwrap_or_else(|| "?".to_owned())
}

/// Gate in front of the cache routes; only PUT requires credentials.
///
/// A missing `Authorization` header yields 401 with a
/// `WWW-Authenticate: Bearer` challenge; anything but a known bearer
/// token yields 403.
pub async fn apply_write_auth(
    Extension(state): Extension<State>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::PUT {
        return next.run(req).await;
    }

    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return ServerError::Unauthorized.into_response();
    };

    let user = value
        .to_str()
        .ok()
        .and_then(bearer_token)
        .and_then(|token| state.config.auth.write.get(token).cloned());

    match user {
        Some(user) => {
            req.extensions_mut().insert(Uploader(user));
            next.run(req).await
        }
        None => ServerError::Forbidden.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_are_extracted() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("  Bearer   abc  "), Some("abc"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_eq!(bearer_token("Basic dXNlcjpwdw=="), None);
        assert_eq!(bearer_token("bearer abc"), None);
    }

    #[test]
    fn missing_tokens_are_rejected() {
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token(""), None);
    }
}
