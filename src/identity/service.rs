//! Identity reconciliation service.
//! Maps either a local credential pair or a federated token onto exactly one
//! user record, creating or linking as needed, and issues the session token.
//! All operations are request-scoped; the directory's unique constraints are
//! the correctness backstop for concurrent creates.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::directory::{DirectoryError, NewUser, PublicUser, Role, User, UserDirectory, UserPatch};
use crate::error::{AppError, AppResult};

use super::federated::{FederatedIdentity, FederatedVerifier};
use super::password::{hash_password, verify_password};
use super::token::TokenCodec;

/// Minimum password length. Known-weak floor kept for client compatibility;
/// a single constant so it can be raised in one place.
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Registration payload. Required fields arrive as `Option` so missing ones
/// can be reported by name, the way the routes always have.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub institution_id: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Federated sign-in payload: the provider token plus optional profile hints
/// used only when a record is auto-created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FederatedSignIn {
    pub token: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub institution_id: Option<String>,
    pub avatar_url: Option<String>,
}

/// Successful authentication: a signed session token and the user it names,
/// credentials excluded. The same shape for both auth methods.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub token: String,
    pub user: PublicUser,
}

pub struct IdentityService {
    directory: Arc<dyn UserDirectory>,
    codec: TokenCodec,
    federated: Option<Arc<dyn FederatedVerifier>>,
}

impl IdentityService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        codec: TokenCodec,
        federated: Option<Arc<dyn FederatedVerifier>>,
    ) -> Self {
        Self { directory, codec, federated }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn issue_token(&self, user: &User) -> AppResult<String> {
        self.codec.sign(user)
    }

    /// Register a local account. Validates shape and content, hashes the
    /// password off the async executor, and creates the record. A
    /// storage-level duplicate from the create is surfaced as the conflict,
    /// so the earlier existence check is a fast path, not the guarantee.
    pub async fn register(&self, account: NewAccount) -> AppResult<User> {
        require(&[
            ("name", &account.name),
            ("email", &account.email),
            ("password", &account.password),
        ])?;
        let name = account.name.unwrap();
        let email = account.email.unwrap();
        let password = account.password.unwrap();

        validate_email(&email)?;
        validate_password(&password)?;
        let role = parse_role(account.role.as_deref())?;

        if self.directory.find_by_email(&email).await?.is_some() {
            return Err(AppError::conflict("email_taken", "email already registered"));
        }

        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AppError::internal("hash_join", e.to_string()))??;

        let user = self
            .directory
            .create(NewUser {
                email,
                name,
                role,
                phone: account.phone,
                avatar_url: account.avatar_url,
                institution_id: account.institution_id,
                password_hash: Some(password_hash),
                federated_id: None,
            })
            .await?;
        info!(user_id = user.id, role = %user.role, "registered user");
        Ok(user)
    }

    /// Local login. Unknown email, federated-only account and wrong password
    /// all fail with the same error; nothing tells a caller which it was.
    pub async fn login(&self, credentials: Credentials) -> AppResult<AuthSession> {
        require(&[("email", &credentials.email), ("password", &credentials.password)])?;
        let email = credentials.email.unwrap();
        let password = credentials.password.unwrap();

        let Some(user) = self.directory.find_by_email(&email).await? else {
            return Err(invalid_credentials());
        };
        let Some(hash) = user.password_hash.clone() else {
            // Federated-only account; indistinguishable from a bad password.
            return Err(invalid_credentials());
        };

        let ok = tokio::task::spawn_blocking(move || verify_password(&hash, &password))
            .await
            .map_err(|e| AppError::internal("verify_join", e.to_string()))?;
        if !ok {
            return Err(invalid_credentials());
        }

        let token = self.codec.sign(&user)?;
        info!(user_id = user.id, "login");
        Ok(AuthSession { token, user: PublicUser::from(&user) })
    }

    /// Federated login-or-register in one step. Verifies the provider token,
    /// then reconciles: existing account by email (linking the subject id if
    /// missing), existing account by subject id (email changed upstream), or
    /// auto-create on first sign-in.
    pub async fn login_federated(&self, request: FederatedSignIn) -> AppResult<AuthSession> {
        let Some(verifier) = self.federated.as_ref() else {
            warn!("federated login attempted but no identity provider is configured");
            return Err(federated_failed());
        };
        require(&[("token", &request.token)])?;
        let external_token = request.token.as_deref().unwrap();

        let Some(identity) = verifier.verify(external_token).await else {
            return Err(federated_failed());
        };
        let Some(email) = identity.email.clone().filter(|e| !e.is_empty()) else {
            warn!(subject = %identity.subject, "federated token verified but carries no email");
            return Err(federated_failed());
        };

        let role = parse_role(request.role.as_deref())?;
        let user = self.reconcile_federated(&identity, &email, role, &request).await?;
        let token = self.codec.sign(&user)?;
        Ok(AuthSession { token, user: PublicUser::from(&user) })
    }

    async fn reconcile_federated(
        &self,
        identity: &FederatedIdentity,
        email: &str,
        role: Role,
        hints: &FederatedSignIn,
    ) -> AppResult<User> {
        if let Some(existing) = self.directory.find_by_email(email).await? {
            if existing.federated_id.is_none() {
                // Account linking: attach the subject id to a previously
                // password-only account. The password hash is untouched.
                let patch = UserPatch {
                    federated_id: Some(identity.subject.clone()),
                    ..Default::default()
                };
                let linked = self.directory.update(existing.id, patch).await?;
                info!(user_id = linked.id, "linked federated identity to existing account");
                return Ok(linked);
            }
            if existing.federated_id.as_deref() != Some(identity.subject.as_str()) {
                warn!(user_id = existing.id, "federated subject differs from stored link; keeping stored link");
            }
            return Ok(existing);
        }

        // Email unknown: the subject id is the fallback key, covering an
        // email change at the provider.
        if let Some(existing) = self.directory.find_by_federated_id(&identity.subject).await? {
            return Ok(existing);
        }

        // First federated sign-in for an unseen email: auto-create, no
        // password hash. Verified attributes win over client hints.
        let name = identity
            .name
            .clone()
            .or_else(|| hints.name.clone())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());
        let created = self
            .directory
            .create(NewUser {
                email: email.to_string(),
                name,
                role,
                phone: hints.phone.clone(),
                avatar_url: hints.avatar_url.clone(),
                institution_id: hints.institution_id.clone(),
                password_hash: None,
                federated_id: Some(identity.subject.clone()),
            })
            .await;
        match created {
            Ok(user) => {
                info!(user_id = user.id, "auto-created user on first federated login");
                Ok(user)
            }
            Err(DirectoryError::Duplicate { .. }) => {
                // Lost a concurrent first-login race; the winner's row is ours.
                self.directory
                    .find_by_email(email)
                    .await?
                    .ok_or_else(|| AppError::conflict("email_taken", "email already registered"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One message for unknown email and wrong password; do not leak which.
fn invalid_credentials() -> AppError {
    AppError::auth("invalid_credentials", "invalid email or password")
}

/// One message for every federated failure: invalid token, no email claim,
/// provider unreachable, provider not configured.
fn federated_failed() -> AppError {
    AppError::auth("federated_auth_failed", "federated sign-in could not be completed")
}

fn require(fields: &[(&str, &Option<String>)]) -> AppResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |s| s.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(
            "missing_fields",
            format!("these fields are required: {}", missing.join(", ")),
        ))
    }
}

fn validate_email(email: &str) -> AppResult<()> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(AppError::validation("invalid_email", "email address is not valid"))
    }
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(
            "weak_password",
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

fn parse_role(role: Option<&str>) -> AppResult<Role> {
    match role {
        None => Ok(Role::Student),
        Some(s) if s.trim().is_empty() => Ok(Role::Student),
        Some(s) => s.parse(),
    }
}
