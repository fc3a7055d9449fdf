//! Federated identity verification.
//! Validates externally-issued ID tokens (Firebase-style) against the
//! provider's published JWK set: RS256 signature, audience = project id,
//! issuer = `https://securetoken.google.com/<project id>`, expiry. Every
//! failure mode collapses to `None` at the API boundary; whether the token
//! was invalid or the provider unreachable is visible only in the logs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::FederatedConfig;
use crate::error::{AppError, AppResult};

/// Sentinel token accepted only in non-production configurations, for
/// integration tests that cannot mint real provider tokens. With the bypass
/// disabled it goes through normal verification and fails like any other
/// malformed token.
pub const SMOKE_TEST_TOKEN: &str = "smoke-test-token";

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Verified identity attributes extracted from a provider token.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    /// The provider's stable subject id for this user.
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Verification seam: the reconciliation service holds this trait, tests
/// substitute a stub, production wires [`FirebaseVerifier`].
#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<FederatedIdentity>;
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

struct CachedJwks {
    fetched_at: Instant,
    keys: JwkSet,
}

/// JWKS-backed verifier for Firebase ID tokens.
pub struct FirebaseVerifier {
    project_id: String,
    issuer: String,
    jwks_url: String,
    client: reqwest::Client,
    allow_test_token: bool,
    cache: RwLock<Option<CachedJwks>>,
}

impl FirebaseVerifier {
    pub fn new(config: &FederatedConfig, allow_test_token: bool) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::config("idp_client", e.to_string()))?;
        Ok(Self {
            project_id: config.project_id.clone(),
            issuer: format!("https://securetoken.google.com/{}", config.project_id),
            jwks_url: config.jwks_url.clone(),
            client,
            allow_test_token,
            cache: RwLock::new(None),
        })
    }

    async fn fetch_jwks(&self) -> anyhow::Result<JwkSet> {
        let keys = self
            .client
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;
        Ok(keys)
    }

    /// Current key set: fresh cache, else a fetch, else a stale cache so a
    /// transient provider outage does not immediately fail all verification.
    async fn keys(&self) -> Option<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Some(cached.keys.clone());
                }
            }
        }
        match self.fetch_jwks().await {
            Ok(keys) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CachedJwks { fetched_at: Instant::now(), keys: keys.clone() });
                Some(keys)
            }
            Err(e) => {
                warn!("identity provider JWKS fetch failed: {e}");
                let cache = self.cache.read().await;
                cache.as_ref().map(|c| c.keys.clone())
            }
        }
    }
}

#[async_trait]
impl FederatedVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Option<FederatedIdentity> {
        if self.allow_test_token && token == SMOKE_TEST_TOKEN {
            warn!("accepting smoke-test federated token (non-production bypass)");
            return Some(FederatedIdentity {
                subject: "smoke-test-subject".to_string(),
                email: Some("smoke-test@campushub.test".to_string()),
                name: Some("Smoke Test".to_string()),
            });
        }

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                debug!("federated token header rejected: {e}");
                return None;
            }
        };
        let Some(kid) = header.kid else {
            debug!("federated token has no kid");
            return None;
        };

        let keys = self.keys().await?;
        let Some(jwk) = keys.find(&kid) else {
            debug!("no provider key for kid {kid}");
            return None;
        };
        let key = match DecodingKey::from_jwk(jwk) {
            Ok(k) => k,
            Err(e) => {
                warn!("provider JWK for kid {kid} unusable: {e}");
                return None;
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        match decode::<ProviderClaims>(token, &key, &validation) {
            Ok(data) => Some(FederatedIdentity {
                subject: data.claims.sub,
                email: data.claims.email,
                name: data.claims.name,
            }),
            Err(e) => {
                debug!("federated token rejected: {e}");
                None
            }
        }
    }
}
