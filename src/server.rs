//!
//! CampusHub HTTP server
//! ---------------------
//! Axum HTTP surface over the authentication core.
//!
//! Responsibilities:
//! - Register/login/sync endpoints backed by the `identity` module.
//! - Bearer-token middleware for protected routes.
//! - The response envelope both auth methods share:
//!   `{ success: true, data: ... }` on success,
//!   `{ success: false, error, message }` on failure.
//! - Opaque mapping of internal faults: full detail to the log, a generic
//!   body to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::directory::{MemoryDirectory, PublicUser, UserDirectory};
use crate::error::AppError;
use crate::identity::{
    self, Credentials, FederatedSignIn, FederatedVerifier, FirebaseVerifier, IdentityService,
    NewAccount, SessionClaims, TokenCodec,
};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityService>,
}

/// Start the CampusHub HTTP server with the in-process user directory.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::new());
    run_with_directory(config, directory).await
}

/// Start the server against an externally constructed directory. The
/// directory's lifecycle belongs to the caller; this function only wires it
/// into the reconciliation service.
pub async fn run_with_directory(
    config: Config,
    directory: Arc<dyn UserDirectory>,
) -> anyhow::Result<()> {
    let codec = TokenCodec::new(&config.jwt_secret, config.token_ttl, &config.token_issuer)?;
    let federated: Option<Arc<dyn FederatedVerifier>> = match config.federated.as_ref() {
        Some(provider) => Some(Arc::new(FirebaseVerifier::new(provider, config.allow_test_token)?)),
        None => {
            warn!("federated login disabled: identity provider not configured");
            None
        }
    };
    let state = AppState {
        identity: Arc::new(IdentityService::new(directory, codec, federated)),
    };

    let protected = Router::new()
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .route("/", get(|| async { "campushub ok" }))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/sync", post(sync_federated))
        .merge(protected)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware for protected routes: verify the bearer token and stash the
/// claims in request extensions. One uninformative failure for a missing
/// header, wrong scheme, bad signature and expiry alike.
async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(claims) = identity::authenticate(state.identity.codec(), request.headers()) else {
        return Err(AppError::auth("unauthorized", "token is missing, invalid or expired"));
    };
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

impl<S> axum::extract::FromRequestParts<S> for SessionClaims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionClaims>()
            .cloned()
            .ok_or_else(|| AppError::auth("unauthorized", "not authenticated"))
    }
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewAccount>,
) -> Result<Response, AppError> {
    let user = state.identity.register(payload).await?;
    let token = state.identity.issue_token(&user)?;
    let body = json!({
        "success": true,
        "data": { "token": token, "user": PublicUser::from(&user) },
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state.identity.login(payload).await?;
    Ok(Json(json!({ "success": true, "data": session })))
}

async fn sync_federated(
    State(state): State<AppState>,
    Json(payload): Json<FederatedSignIn>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state.identity.login_federated(payload).await?;
    Ok(Json(json!({ "success": true, "data": session })))
}

async fn me(claims: SessionClaims) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": { "user": claims } }))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let (code, message) = if self.is_opaque() {
            error!("request failed: {}", self);
            let generic = if status == StatusCode::SERVICE_UNAVAILABLE {
                "service temporarily unavailable"
            } else {
                "an internal error occurred"
            };
            ("server_error".to_string(), generic.to_string())
        } else {
            (self.code_str().to_string(), self.message().to_string())
        };
        let body = Json(json!({ "success": false, "error": code, "message": message }));
        (status, body).into_response()
    }
}
