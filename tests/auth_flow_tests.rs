//! Reconciliation integration tests: local register/login and federated
//! login against the in-process directory, positive and negative paths.

use std::collections::HashMap;
use std::sync::Arc;

use campushub::config::TOKEN_ISSUER;
use campushub::directory::{MemoryDirectory, Role, UserDirectory};
use campushub::identity::{
    Credentials, FederatedIdentity, FederatedSignIn, FederatedVerifier, IdentityService,
    NewAccount, TokenCodec,
};

/// Maps fixed token strings to identities; everything else fails to verify.
struct StubVerifier {
    identities: HashMap<String, FederatedIdentity>,
}

impl StubVerifier {
    fn with(entries: &[(&str, &str, Option<&str>, Option<&str>)]) -> Arc<Self> {
        let identities = entries
            .iter()
            .map(|&(token, subject, email, name)| {
                (
                    token.to_string(),
                    FederatedIdentity {
                        subject: subject.to_string(),
                        email: email.map(str::to_string),
                        name: name.map(str::to_string),
                    },
                )
            })
            .collect();
        Arc::new(Self { identities })
    }
}

#[async_trait::async_trait]
impl FederatedVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Option<FederatedIdentity> {
        self.identities.get(token).cloned()
    }
}

fn codec() -> TokenCodec {
    TokenCodec::new("integration-secret", chrono::Duration::days(7), TOKEN_ISSUER).unwrap()
}

fn account(name: &str, email: &str, password: &str) -> NewAccount {
    NewAccount {
        name: Some(name.to_string()),
        email: Some(email.to_string()),
        password: Some(password.to_string()),
        ..Default::default()
    }
}

fn credentials(email: &str, password: &str) -> Credentials {
    Credentials { email: Some(email.to_string()), password: Some(password.to_string()) }
}

fn sign_in(token: &str) -> FederatedSignIn {
    FederatedSignIn { token: Some(token.to_string()), ..Default::default() }
}

#[tokio::test]
async fn register_then_login_roundtrip() {
    let service = IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), None);

    let user = service.register(account("A", "a@x.com", "secret1")).await.unwrap();
    assert_eq!(user.role, Role::Student);
    assert_eq!(user.email, "a@x.com");
    assert!(user.password_hash.is_some());
    assert!(user.federated_id.is_none());

    let session = service.login(credentials("a@x.com", "secret1")).await.unwrap();
    assert_eq!(session.user.id, user.id);
    assert_eq!(session.user.role, Role::Student);

    // The token round-trips through the codec with the user's claims.
    let claims = codec().verify(&session.token).expect("valid session token");
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.email, "a@x.com");
    assert_eq!(claims.role, Role::Student);
    assert_eq!(claims.iss, TOKEN_ISSUER);

    // Credentials never appear in the serialized response shape.
    let body = serde_json::to_string(&session).unwrap();
    assert!(!body.contains("password"));
    assert!(!body.contains("argon2"));
}

#[tokio::test]
async fn duplicate_registration_conflicts_and_leaves_first_account_untouched() {
    let service = IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), None);

    service.register(account("First", "a@x.com", "secret1")).await.unwrap();
    let err = service.register(account("Second", "a@x.com", "other-password")).await.unwrap_err();
    assert_eq!(err.code_str(), "email_taken");
    assert_eq!(err.http_status(), 409);

    // The original account still logs in with its original password and name.
    let session = service.login(credentials("a@x.com", "secret1")).await.unwrap();
    assert_eq!(session.user.name, "First");
    assert!(service.login(credentials("a@x.com", "other-password")).await.is_err());
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let service = IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), None);
    service.register(account("A", "a@x.com", "secret1")).await.unwrap();

    let wrong_password = service.login(credentials("a@x.com", "wrong-1")).await.unwrap_err();
    let unknown_email = service.login(credentials("ghost@x.com", "secret1")).await.unwrap_err();

    assert_eq!(wrong_password.code_str(), unknown_email.code_str());
    assert_eq!(wrong_password.message(), unknown_email.message());
    assert_eq!(wrong_password.http_status(), 401);
}

#[tokio::test]
async fn registration_validation() {
    let service = IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), None);

    let missing = service
        .register(NewAccount { email: Some("a@x.com".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(missing.code_str(), "missing_fields");
    assert!(missing.message().contains("name"));
    assert!(missing.message().contains("password"));

    let bad_email = service.register(account("A", "not-an-email", "secret1")).await.unwrap_err();
    assert_eq!(bad_email.code_str(), "invalid_email");

    let weak = service.register(account("A", "a@x.com", "12345")).await.unwrap_err();
    assert_eq!(weak.code_str(), "weak_password");

    let mut dean = account("A", "a@x.com", "secret1");
    dean.role = Some("dean".to_string());
    let bad_role = service.register(dean).await.unwrap_err();
    assert_eq!(bad_role.code_str(), "invalid_role");
    assert_eq!(bad_role.http_status(), 400);

    // Valid role strings are accepted as-is.
    let mut lecturer = account("L", "l@x.com", "secret1");
    lecturer.role = Some("lecturer".to_string());
    let user = service.register(lecturer).await.unwrap();
    assert_eq!(user.role, Role::Lecturer);
}

#[tokio::test]
async fn federated_first_login_auto_creates_student() {
    let directory = Arc::new(MemoryDirectory::new());
    let verifier = StubVerifier::with(&[("tok-b", "fed-b", Some("b@x.com"), Some("B"))]);
    let service = IdentityService::new(directory.clone(), codec(), Some(verifier));

    let mut request = sign_in("tok-b");
    request.institution_id = Some("2210001".to_string());
    let session = service.login_federated(request).await.unwrap();

    assert_eq!(session.user.email, "b@x.com");
    assert_eq!(session.user.name, "B");
    assert_eq!(session.user.role, Role::Student);
    assert_eq!(session.user.institution_id.as_deref(), Some("2210001"));

    let stored = directory.find_by_email("b@x.com").await.unwrap().unwrap();
    assert_eq!(stored.federated_id.as_deref(), Some("fed-b"));
    assert!(stored.password_hash.is_none());

    // A second sign-in reuses the record instead of creating another.
    let again = service.login_federated(sign_in("tok-b")).await.unwrap();
    assert_eq!(again.user.id, session.user.id);
}

#[tokio::test]
async fn federated_login_links_existing_account_and_keeps_password() {
    let directory = Arc::new(MemoryDirectory::new());
    let verifier = StubVerifier::with(&[("tok-a", "fed-a", Some("a@x.com"), Some("A Federated"))]);
    let service = IdentityService::new(directory.clone(), codec(), Some(verifier));

    let registered = service.register(account("A", "a@x.com", "secret1")).await.unwrap();
    let session = service.login_federated(sign_in("tok-a")).await.unwrap();
    assert_eq!(session.user.id, registered.id);

    let stored = directory.find_by_email("a@x.com").await.unwrap().unwrap();
    assert_eq!(stored.federated_id.as_deref(), Some("fed-a"));
    assert!(stored.password_hash.is_some());

    // The password path still works after linking.
    let local = service.login(credentials("a@x.com", "secret1")).await.unwrap();
    assert_eq!(local.user.id, registered.id);
}

#[tokio::test]
async fn federated_relink_by_subject_after_upstream_email_change() {
    let directory = Arc::new(MemoryDirectory::new());
    let verifier = StubVerifier::with(&[
        ("tok-1", "fed-c", Some("c@x.com"), Some("C")),
        ("tok-2", "fed-c", Some("c-new@x.com"), Some("C")),
    ]);
    let service = IdentityService::new(directory.clone(), codec(), Some(verifier));

    let first = service.login_federated(sign_in("tok-1")).await.unwrap();
    let second = service.login_federated(sign_in("tok-2")).await.unwrap();

    // Same subject id resolves to the same record; no second row appears.
    assert_eq!(second.user.id, first.user.id);
    assert!(directory.find_by_email("c-new@x.com").await.unwrap().is_none());
}

#[tokio::test]
async fn federated_failures_are_uniform() {
    let verifier = StubVerifier::with(&[("no-email", "fed-x", None, None)]);
    let service =
        IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), Some(verifier));

    let invalid_token = service.login_federated(sign_in("unknown-token")).await.unwrap_err();
    let no_email_claim = service.login_federated(sign_in("no-email")).await.unwrap_err();

    assert_eq!(invalid_token.code_str(), no_email_claim.code_str());
    assert_eq!(invalid_token.message(), no_email_claim.message());
    assert_eq!(invalid_token.http_status(), 401);
}

#[tokio::test]
async fn federated_login_without_provider_fails_as_authentication() {
    let service = IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), None);
    let err = service.login_federated(sign_in("anything")).await.unwrap_err();
    assert_eq!(err.code_str(), "federated_auth_failed");
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn federated_role_hint_is_validated() {
    let verifier = StubVerifier::with(&[("tok-d", "fed-d", Some("d@x.com"), None)]);
    let service =
        IdentityService::new(Arc::new(MemoryDirectory::new()), codec(), Some(verifier));

    let mut request = sign_in("tok-d");
    request.role = Some("superuser".to_string());
    let err = service.login_federated(request).await.unwrap_err();
    assert_eq!(err.code_str(), "invalid_role");

    let mut request = sign_in("tok-d");
    request.role = Some("lecturer".to_string());
    let session = service.login_federated(request).await.unwrap();
    assert_eq!(session.user.role, Role::Lecturer);
}
