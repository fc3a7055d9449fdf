//! Request authenticator.
//! Pure functions over the authorization header: extract a bearer token,
//! verify it, hand back claims. No I/O, no side effects; absent header,
//! wrong scheme and malformed value are all the same `None`.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use super::token::{SessionClaims, TokenCodec};

/// Extract the credential from a `Bearer <token>` authorization header.
/// Exactly two space-separated parts with a `Bearer` scheme; anything else
/// is `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let parts: Vec<&str> = value.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return None;
    }
    Some(parts[1])
}

/// Identity claims of the caller, if the request carries a valid session
/// token.
pub fn authenticate(codec: &TokenCodec, headers: &HeaderMap) -> Option<SessionClaims> {
    codec.verify(bearer_token(headers)?)
}
