//! Session token codec.
//! Sessions are self-contained HS256 JWTs held entirely by the client; the
//! server keeps no session table and cannot revoke a token before its
//! expiry. Logout is client-side token deletion.

use std::fmt;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{Role, User};
use crate::error::{AppError, AppResult};

/// Decoded payload of a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the user's directory id.
    pub sub: i64,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs and verifies session tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    ttl: chrono::Duration,
    issuer: String,
}

impl TokenCodec {
    /// An empty secret is a configuration fault and refuses construction;
    /// [`crate::config::Config`] enforces the same at startup.
    pub fn new(secret: &str, ttl: chrono::Duration, issuer: &str) -> AppResult<Self> {
        if secret.trim().is_empty() {
            return Err(AppError::config("missing_secret", "token signing secret is not configured"));
        }
        Ok(Self { secret: secret.to_string(), ttl, issuer: issuer.to_string() })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for a user record, stamped with expiry and issuer.
    pub fn sign(&self, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| AppError::internal("token_sign", e.to_string()))
    }

    /// Verify signature, expiry and issuer. Any failure is `None`; callers
    /// treat "no valid session" as the single failure mode. The reason is
    /// logged at debug for diagnostics only.
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        match decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("session token rejected: {}", e);
                None
            }
        }
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .field("issuer", &self.issuer)
            .finish()
    }
}
