//! User directory: the durable identity store.
//! The reconciliation service only sees the [`UserDirectory`] trait; storage
//! is injected at startup. The in-memory implementation here backs the demo
//! server and tests, and enforces the same unique constraints (email,
//! federated subject id) a SQL schema would, because the service treats a
//! storage-level duplicate as the authoritative conflict signal.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppError;

/// The enumerated role set. Wire strings are exactly `student`, `lecturer`,
/// `admin`; anything else is rejected at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Lecturer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Lecturer => "lecturer",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "lecturer" => Ok(Role::Lecturer),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::validation(
                "invalid_role",
                format!("role must be one of student, lecturer, admin; got `{other}`"),
            )),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable user record. A user always has at least one authentication method
/// populated: a password hash, a federated subject id, or both after linking.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub institution_id: Option<String>,
    /// PHC-format Argon2 hash; absent for federated-only accounts.
    pub password_hash: Option<String>,
    /// Identity provider's stable subject id; unique when present.
    pub federated_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Client-facing projection of [`User`]. Credentials are excluded
/// structurally, not by serializer flags, so no response path can leak them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub institution_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        PublicUser {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            role: u.role,
            phone: u.phone.clone(),
            avatar_url: u.avatar_url.clone(),
            institution_id: u.institution_id.clone(),
            created_at: u.created_at,
        }
    }
}

/// Fields for a new user row; the directory assigns the id and timestamp.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub institution_id: Option<String>,
    pub password_hash: Option<String>,
    pub federated_id: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub institution_id: Option<String>,
    pub federated_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("duplicate value for unique field `{field}`")]
    Duplicate { field: &'static str },
    #[error("user not found")]
    NotFound,
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Duplicate { field: "email" } => {
                AppError::conflict("email_taken", "email already registered")
            }
            DirectoryError::Duplicate { field } => {
                AppError::conflict("duplicate", format!("{field} already registered"))
            }
            DirectoryError::NotFound => AppError::not_found("user_not_found", "user not found"),
            DirectoryError::Unavailable(msg) => AppError::io("directory_unavailable", msg),
        }
    }
}

/// Persistence seam consumed by the reconciliation service. Implementations
/// must enforce uniqueness on email and on federated subject id at the
/// storage layer.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;
    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, DirectoryError>;
    async fn create(&self, fields: NewUser) -> Result<User, DirectoryError>;
    async fn update(&self, id: i64, patch: UserPatch) -> Result<User, DirectoryError>;
}

/// In-process directory. Uniqueness checks and the row write happen under
/// one write lock; create and update are atomic from the caller's view.
pub struct MemoryDirectory {
    inner: RwLock<MemoryInner>,
}

struct MemoryInner {
    next_id: i64,
    users: HashMap<i64, User>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self { inner: RwLock::new(MemoryInner { next_id: 1, users: HashMap::new() }) }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, DirectoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.federated_id.as_deref() == Some(federated_id))
            .cloned())
    }

    async fn create(&self, fields: NewUser) -> Result<User, DirectoryError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == fields.email) {
            return Err(DirectoryError::Duplicate { field: "email" });
        }
        if let Some(fid) = fields.federated_id.as_deref() {
            if inner.users.values().any(|u| u.federated_id.as_deref() == Some(fid)) {
                return Err(DirectoryError::Duplicate { field: "federated_id" });
            }
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let user = User {
            id,
            email: fields.email,
            name: fields.name,
            role: fields.role,
            phone: fields.phone,
            avatar_url: fields.avatar_url,
            institution_id: fields.institution_id,
            password_hash: fields.password_hash,
            federated_id: fields.federated_id,
            created_at: Utc::now(),
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, patch: UserPatch) -> Result<User, DirectoryError> {
        let mut inner = self.inner.write().await;
        if let Some(fid) = patch.federated_id.as_deref() {
            if inner
                .users
                .values()
                .any(|u| u.id != id && u.federated_id.as_deref() == Some(fid))
            {
                return Err(DirectoryError::Duplicate { field: "federated_id" });
            }
        }
        let user = inner.users.get_mut(&id).ok_or(DirectoryError::NotFound)?;
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(phone) = patch.phone {
            user.phone = Some(phone);
        }
        if let Some(avatar_url) = patch.avatar_url {
            user.avatar_url = Some(avatar_url);
        }
        if let Some(institution_id) = patch.institution_id {
            user.institution_id = Some(institution_id);
        }
        if let Some(federated_id) = patch.federated_id {
            user.federated_id = Some(federated_id);
        }
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Someone".to_string(),
            role: Role::Student,
            phone: None,
            avatar_url: None,
            institution_id: None,
            password_hash: Some("$argon2id$fake".to_string()),
            federated_id: None,
        }
    }

    #[test]
    fn role_wire_strings_are_fixed() {
        assert_eq!(Role::Student.as_str(), "student");
        assert_eq!(Role::Lecturer.as_str(), "lecturer");
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!("lecturer".parse::<Role>().unwrap(), Role::Lecturer);
        assert!("professor".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn public_user_has_no_credential_fields() {
        // Structural check: serializing PublicUser must never expose a hash.
        let user = User {
            id: 1,
            email: "a@x.com".into(),
            name: "A".into(),
            role: Role::Student,
            phone: None,
            avatar_url: None,
            institution_id: None,
            password_hash: Some("$argon2id$secret".into()),
            federated_id: Some("fed-1".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("fed-1"));
    }

    #[tokio::test]
    async fn create_then_find_roundtrip() {
        let dir = MemoryDirectory::new();
        let created = dir.create(new_user("a@x.com")).await.unwrap();
        assert_eq!(created.id, 1);
        let found = dir.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(dir.find_by_email("b@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let dir = MemoryDirectory::new();
        dir.create(new_user("a@x.com")).await.unwrap();
        let err = dir.create(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Duplicate { field: "email" }));
    }

    #[tokio::test]
    async fn duplicate_federated_id_rejected() {
        let dir = MemoryDirectory::new();
        let mut first = new_user("a@x.com");
        first.federated_id = Some("fed-1".into());
        dir.create(first).await.unwrap();

        let mut second = new_user("b@x.com");
        second.federated_id = Some("fed-1".into());
        let err = dir.create(second).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Duplicate { field: "federated_id" }));

        // Same constraint on the update path.
        let other = dir.create(new_user("c@x.com")).await.unwrap();
        let patch = UserPatch { federated_id: Some("fed-1".into()), ..Default::default() };
        let err = dir.update(other.id, patch).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Duplicate { field: "federated_id" }));
    }

    #[tokio::test]
    async fn update_links_federated_id_and_keeps_other_fields() {
        let dir = MemoryDirectory::new();
        let created = dir.create(new_user("a@x.com")).await.unwrap();
        let patch = UserPatch { federated_id: Some("fed-9".into()), ..Default::default() };
        let updated = dir.update(created.id, patch).await.unwrap();
        assert_eq!(updated.federated_id.as_deref(), Some("fed-9"));
        assert_eq!(updated.password_hash, created.password_hash);
        assert_eq!(updated.email, created.email);

        let err = dir.update(999, UserPatch::default()).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound));
    }
}
