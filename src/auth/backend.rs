//! Identity backend seam
//!
//! [`Auth`](crate::Auth) validates input, applies deadlines and logs; the
//! backend performs the remote call. Two implementations ship with the crate:
//! [`RestBackend`](crate::auth::rest::RestBackend) for Identity Toolkit and the
//! Auth emulator, and [`MemoryBackend`](crate::auth::memory::MemoryBackend) for
//! tests and offline demos.
//!
//! Arguments reaching a backend have already passed local validation.

use crate::auth::token::{CustomTokenClaims, VerifiedToken};
use crate::auth::types::{UserKey, UserPage, UserRecord, UserToCreate, UserToUpdate};
use crate::error::FirebaseError;
use async_trait::async_trait;

/// Remote operations behind [`Auth`](crate::Auth)
///
/// Implementations must be safe to call concurrently; the façade shares one
/// backend between every clone of an `Auth` handle.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Project the backend is scoped to
    fn project_id(&self) -> &str;

    /// Look up one user by any unique key; `NotFound` when absent
    async fn get_user(&self, key: UserKey) -> Result<UserRecord, FirebaseError>;

    /// Create a user and return its uid
    async fn create_user(&self, user: UserToCreate) -> Result<String, FirebaseError>;

    /// Apply the present fields of `update`; `NotFound` when absent
    async fn update_user(&self, uid: String, update: UserToUpdate) -> Result<(), FirebaseError>;

    /// Delete a user; `NotFound` when absent
    async fn delete_user(&self, uid: String) -> Result<(), FirebaseError>;

    /// Fetch at most `page_size` users after `page_token`
    async fn list_users(&self, page_size: usize, page_token: Option<String>) -> Result<UserPage, FirebaseError>;

    /// Sign a custom token payload
    ///
    /// `signer` is filled in by the backend: the claims arrive with empty
    /// `iss`/`sub` and leave signed by whatever identity the backend holds.
    async fn sign_custom_token(&self, claims: CustomTokenClaims) -> Result<String, FirebaseError>;

    /// Check an ID token's signature and registered claims
    async fn verify_id_token(&self, token: String) -> Result<VerifiedToken, FirebaseError>;
}
