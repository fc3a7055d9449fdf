//! Authentication core: credential hashing, session tokens, federated
//! verification and the reconciliation service that ties them together.
//! Keep the public surface thin and split implementation across sub-modules.

mod authenticator;
mod federated;
mod password;
mod service;
mod token;

pub use authenticator::{authenticate, bearer_token};
pub use federated::{FederatedIdentity, FederatedVerifier, FirebaseVerifier, SMOKE_TEST_TOKEN};
pub use password::{hash_password, verify_password};
pub use service::{AuthSession, Credentials, FederatedSignIn, IdentityService, NewAccount};
pub use token::{SessionClaims, TokenCodec};
