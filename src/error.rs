//! Unified application error model and mapping helpers.
//! One enum is used across the reconciliation service, the request
//! authenticator and the HTTP layer; the client-facing mapping happens once,
//! at the server boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Bad input shape or content (missing fields, bad email, weak password).
    Validation { code: String, message: String },
    /// Bad credentials or unverifiable federated token. Messages are kept
    /// deliberately uninformative about which factor failed.
    Auth { code: String, message: String },
    /// Duplicate email or federated subject id.
    Conflict { code: String, message: String },
    NotFound { code: String, message: String },
    /// Missing signing secret or misconfigured provider. Fatal at startup.
    Config { code: String, message: String },
    /// Identity provider unreachable or timed out.
    Upstream { code: String, message: String },
    /// User directory unreachable; retryable by the client.
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Config { code, .. }
            | AppError::Upstream { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Config { message, .. }
            | AppError::Upstream { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn auth<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn conflict<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn not_found<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn config<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn upstream<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Upstream { code: code.into(), message: msg.into() } }
    pub fn io<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::Conflict { .. } => 409,
            AppError::NotFound { .. } => 404,
            AppError::Config { .. } => 500,
            AppError::Upstream { .. } => 503,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// True for the classes whose details must never reach a client.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self,
            AppError::Config { .. } | AppError::Internal { .. } | AppError::Io { .. }
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::validation("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::auth("invalid_credentials", "no").http_status(), 401);
        assert_eq!(AppError::conflict("email_taken", "dup").http_status(), 409);
        assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(AppError::config("missing_secret", "unset").http_status(), 500);
        assert_eq!(AppError::upstream("idp_unreachable", "timeout").http_status(), 503);
        assert_eq!(AppError::io("directory", "down").http_status(), 503);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn opaque_classes() {
        assert!(AppError::internal("internal", "stack trace here").is_opaque());
        assert!(AppError::config("missing_secret", "CAMPUSHUB_JWT_SECRET").is_opaque());
        assert!(AppError::io("directory", "connect refused").is_opaque());
        assert!(!AppError::validation("bad_input", "shown to client").is_opaque());
        assert!(!AppError::auth("invalid_credentials", "shown to client").is_opaque());
    }

    #[test]
    fn display_carries_code_and_message() {
        let e = AppError::conflict("email_taken", "email already registered");
        assert_eq!(e.to_string(), "email_taken: email already registered");
        assert_eq!(e.code_str(), "email_taken");
        assert_eq!(e.message(), "email already registered");
    }
}
