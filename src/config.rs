//! Startup configuration.
//! All environment variables are read and validated exactly once, before the
//! server starts; a missing signing secret fails startup instead of surfacing
//! per-request. Absent identity-provider settings disable federated login
//! with a warning rather than crashing.

use std::time::Duration as StdDuration;

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Issuer tag stamped into every session token and required on verification.
pub const TOKEN_ISSUER: &str = "campushub-api";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_IDP_TIMEOUT_SECS: u64 = 5;

// Firebase publishes the securetoken signing keys as a JWK set here.
const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Identity-provider settings; present only when federated login is enabled.
#[derive(Debug, Clone)]
pub struct FederatedConfig {
    /// Expected token audience, and the suffix of the expected issuer.
    pub project_id: String,
    pub jwks_url: String,
    pub timeout: StdDuration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub token_issuer: String,
    pub federated: Option<FederatedConfig>,
    /// Accept the integration-test sentinel token. Forced off in production.
    pub allow_test_token: bool,
    pub production: bool,
}

impl Config {
    /// Read and validate configuration from `CAMPUSHUB_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::build(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Split out of [`Config::from_env`]
    /// so validation is testable without touching process environment.
    pub fn build(var: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let jwt_secret = var("CAMPUSHUB_JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                AppError::config("missing_secret", "CAMPUSHUB_JWT_SECRET must be set to a non-empty signing secret")
            })?;

        let http_port = match var("CAMPUSHUB_HTTP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                AppError::config("bad_port", format!("CAMPUSHUB_HTTP_PORT is not a valid port: {raw}"))
            })?,
            None => DEFAULT_HTTP_PORT,
        };

        let ttl_days = match var("CAMPUSHUB_JWT_TTL_DAYS") {
            Some(raw) => {
                let days = raw.parse::<i64>().map_err(|_| {
                    AppError::config("bad_ttl", format!("CAMPUSHUB_JWT_TTL_DAYS is not a number: {raw}"))
                })?;
                if days <= 0 {
                    return Err(AppError::config("bad_ttl", "CAMPUSHUB_JWT_TTL_DAYS must be positive"));
                }
                days
            }
            None => DEFAULT_TOKEN_TTL_DAYS,
        };

        let token_issuer = var("CAMPUSHUB_JWT_ISSUER").unwrap_or_else(|| TOKEN_ISSUER.to_string());

        let production = var("CAMPUSHUB_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        // The sentinel bypass must not be reachable in production, whatever
        // the variable says.
        let allow_test_token = !production
            && var("CAMPUSHUB_ALLOW_TEST_TOKEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);

        let federated = match var("CAMPUSHUB_FIREBASE_PROJECT_ID").filter(|s| !s.trim().is_empty()) {
            Some(project_id) => {
                let timeout_secs = match var("CAMPUSHUB_IDP_TIMEOUT_SECS") {
                    Some(raw) => raw.parse::<u64>().map_err(|_| {
                        AppError::config("bad_timeout", format!("CAMPUSHUB_IDP_TIMEOUT_SECS is not a number: {raw}"))
                    })?,
                    None => DEFAULT_IDP_TIMEOUT_SECS,
                };
                Some(FederatedConfig {
                    project_id,
                    jwks_url: var("CAMPUSHUB_JWKS_URL").unwrap_or_else(|| DEFAULT_JWKS_URL.to_string()),
                    timeout: StdDuration::from_secs(timeout_secs),
                })
            }
            None => {
                warn!("CAMPUSHUB_FIREBASE_PROJECT_ID not set; federated login is disabled");
                None
            }
        };

        Ok(Config {
            http_port,
            jwt_secret,
            token_ttl: chrono::Duration::days(ttl_days),
            token_issuer,
            federated,
            allow_test_token,
            production,
        })
    }
}
