//! Firebase Authentication admin client
//!
//! # REST Reference
//! - Custom tokens: <https://firebase.google.com/docs/auth/admin/create-custom-tokens>
//! - ID token verification: <https://firebase.google.com/docs/auth/admin/verify-id-tokens>
//! - User management: <https://firebase.google.com/docs/auth/admin/manage-users>
//! - Custom claims: <https://firebase.google.com/docs/auth/admin/custom-claims>

use crate::auth::backend::AuthBackend;
use crate::auth::pager::UserPager;
use crate::auth::token::{parse_unverified, CustomTokenClaims, VerifiedToken};
use crate::auth::types::{
    validate_developer_claims, validate_email, validate_phone_number, validate_uid, Claims,
    UserKey, UserPage, UserRecord, UserToCreate, UserToUpdate, MAX_LIST_USERS_RESULTS,
};
use crate::error::{FirebaseError, TokenError};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deadline applied to each backend call unless configured otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Firebase Authentication admin client
///
/// Cheap to clone; clones share the backend. Every operation checks its
/// arguments locally first and fails with `InvalidArgument` before any
/// network call. Each backend round trip is bounded by the request timeout and
/// fails with `Timeout` when it runs over.
///
/// Obtain one from [`App::auth`](crate::App::auth), or build one over any
/// [`AuthBackend`] with [`Auth::with_backend`].
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    backend: Arc<dyn AuthBackend>,
    timeout: Duration,
}

impl Auth {
    /// Build a client over `backend` with the default timeout
    pub fn with_backend(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                backend,
                timeout: DEFAULT_REQUEST_TIMEOUT,
            }),
        }
    }

    /// Same backend, different per-call deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                backend: Arc::clone(&self.inner.backend),
                timeout,
            }),
        }
    }

    /// True when both handles are clones of one client
    #[cfg(test)]
    pub(crate) fn is_same_client(&self, other: &Auth) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Project this client manages
    pub fn project_id(&self) -> &str {
        self.inner.backend.project_id()
    }

    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Await a backend call under the deadline
    async fn call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, FirebaseError>>,
    ) -> Result<T, FirebaseError> {
        match tokio::time::timeout(self.inner.timeout, call).await {
            Err(_) => Err(FirebaseError::Timeout(format!(
                "{} did not complete within {:?}",
                operation, self.inner.timeout
            ))),
            Ok(result) => result,
        }
    }

    /// Mint a custom token for `uid`
    ///
    /// The token is signed by the backend's identity and is valid for one
    /// hour. Clients exchange it for an ID token when signing in.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// let token = auth.create_custom_token("some-uid").await?;
    /// println!("Got custom token: {}", token);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_custom_token(&self, uid: &str) -> Result<String, FirebaseError> {
        self.mint(uid, None).await
    }

    /// Mint a custom token carrying developer claims
    ///
    /// The claims appear in the ID token the client receives after signing
    /// in. Reserved JWT claim names are rejected with `InvalidArgument`.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// let mut claims = serde_json::Map::new();
    /// claims.insert("premiumAccount".to_string(), serde_json::json!(true));
    /// let token = auth.create_custom_token_with_claims("some-uid", claims).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_custom_token_with_claims(
        &self,
        uid: &str,
        claims: Claims,
    ) -> Result<String, FirebaseError> {
        self.mint(uid, Some(claims)).await
    }

    async fn mint(&self, uid: &str, claims: Option<Claims>) -> Result<String, FirebaseError> {
        validate_uid(uid)?;
        if let Some(claims) = &claims {
            validate_developer_claims(claims)?;
        }

        debug!(uid = %uid, "minting custom token");
        let payload = CustomTokenClaims::new("", uid, claims, Utc::now());
        self.call("create_custom_token", self.inner.backend.sign_custom_token(payload))
            .await
    }

    /// Verify an ID token and return its claims
    ///
    /// Structural problems are reported as `Token(Malformed)` without any
    /// network call. Signature, audience, issuer and expiry are then checked
    /// against the backend's published keys.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth, id_token: &str) {
    /// use firebase_admin_rs::{FirebaseError, TokenError};
    ///
    /// match auth.verify_id_token(id_token).await {
    ///     Err(FirebaseError::Token(TokenError::Expired)) => println!("token expired, ask the client to refresh"),
    ///     Err(e) => println!("error verifying ID token: {}", e),
    ///     Ok(token) => println!("Verified ID token: {:?}", token),
    /// }
    /// # }
    /// ```
    pub async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedToken, FirebaseError> {
        parse_unverified(id_token)?;

        debug!("verifying ID token");
        self.call(
            "verify_id_token",
            self.inner.backend.verify_id_token(id_token.to_string()),
        )
        .await
    }

    /// Verify an ID token, then check the user is enabled and the token was
    /// not revoked
    ///
    /// Costs one extra user lookup. Fails with `Token(Revoked)` when the token
    /// predates the last [`revoke_refresh_tokens`](Self::revoke_refresh_tokens)
    /// and with `Token(UserDisabled)` when the account is disabled.
    pub async fn verify_id_token_and_check_revoked(
        &self,
        id_token: &str,
    ) -> Result<VerifiedToken, FirebaseError> {
        let token = self.verify_id_token(id_token).await?;
        let user = self.get_user(&token.uid).await?;

        if user.disabled {
            return Err(TokenError::UserDisabled.into());
        }
        if token.auth_time.timestamp() * 1000 < user.tokens_valid_after_millis {
            return Err(TokenError::Revoked.into());
        }
        Ok(token)
    }

    /// Look up a user by uid
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// let user = auth.get_user("some-uid").await?;
    /// println!("Successfully fetched user data: {:?}", user);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_user(&self, uid: &str) -> Result<UserRecord, FirebaseError> {
        validate_uid(uid)?;
        self.lookup(UserKey::Uid(uid.to_string())).await
    }

    /// Look up a user by email
    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord, FirebaseError> {
        validate_email(email)?;
        self.lookup(UserKey::Email(email.to_string())).await
    }

    /// Look up a user by phone number (E.164)
    pub async fn get_user_by_phone_number(&self, phone: &str) -> Result<UserRecord, FirebaseError> {
        validate_phone_number(phone)?;
        self.lookup(UserKey::PhoneNumber(phone.to_string())).await
    }

    async fn lookup(&self, key: UserKey) -> Result<UserRecord, FirebaseError> {
        debug!(key = %key, "looking up user");
        self.call("get_user", self.inner.backend.get_user(key)).await
    }

    /// Create a user and return the stored record
    ///
    /// Fails with `AlreadyExists` when the uid, email or phone number is
    /// taken.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// use firebase_admin_rs::auth::types::UserToCreate;
    ///
    /// let user = auth
    ///     .create_user(
    ///         UserToCreate::new()
    ///             .email("user@example.com")
    ///             .password("secretPassword")
    ///             .display_name("John Doe"),
    ///     )
    ///     .await?;
    /// println!("Successfully created user: {}", user.uid);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_user(&self, user: UserToCreate) -> Result<UserRecord, FirebaseError> {
        user.validate()?;

        debug!(user = ?user, "creating user");
        let uid = self.call("create_user", self.inner.backend.create_user(user)).await?;
        self.lookup(UserKey::Uid(uid)).await
    }

    /// Apply `update` to an existing user and return the fresh record
    ///
    /// Fields left unset are untouched.
    pub async fn update_user(
        &self,
        uid: &str,
        update: UserToUpdate,
    ) -> Result<UserRecord, FirebaseError> {
        self.apply_update(uid, update).await?;
        self.lookup(UserKey::Uid(uid.to_string())).await
    }

    async fn apply_update(&self, uid: &str, update: UserToUpdate) -> Result<(), FirebaseError> {
        validate_uid(uid)?;
        update.validate()?;

        debug!(uid = %uid, update = ?update, "updating user");
        self.call(
            "update_user",
            self.inner.backend.update_user(uid.to_string(), update),
        )
        .await
    }

    /// Delete a user
    ///
    /// Not idempotent: deleting a missing user fails with `NotFound`.
    pub async fn delete_user(&self, uid: &str) -> Result<(), FirebaseError> {
        validate_uid(uid)?;

        debug!(uid = %uid, "deleting user");
        self.call("delete_user", self.inner.backend.delete_user(uid.to_string()))
            .await
    }

    /// Replace the custom claims of a user
    ///
    /// `None` removes all claims. The new set takes effect in ID tokens
    /// issued after the call.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// let mut claims = serde_json::Map::new();
    /// claims.insert("admin".to_string(), serde_json::json!(true));
    /// auth.set_custom_user_claims("some-uid", Some(claims)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: Option<Claims>,
    ) -> Result<(), FirebaseError> {
        let update = UserToUpdate::new().custom_claims(claims.unwrap_or_default());
        self.apply_update(uid, update).await
    }

    /// Invalidate every refresh token of a user
    ///
    /// ID tokens already issued stay valid until they expire, except to
    /// [`verify_id_token_and_check_revoked`](Self::verify_id_token_and_check_revoked).
    pub async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), FirebaseError> {
        let update = UserToUpdate::new().valid_since(Utc::now().timestamp());
        self.apply_update(uid, update).await
    }

    /// Iterate over all users, optionally from a page token
    ///
    /// Nothing is fetched until the pager is first polled.
    pub fn list_users(&self, page_token: Option<&str>) -> UserPager {
        UserPager::new(self.clone(), page_token.map(str::to_string))
    }

    /// One backend round trip of a listing
    pub(crate) async fn fetch_page(
        &self,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<UserPage, FirebaseError> {
        if page_size == 0 || page_size > MAX_LIST_USERS_RESULTS {
            return Err(FirebaseError::invalid_argument(format!(
                "page size must be between 1 and {}",
                MAX_LIST_USERS_RESULTS
            )));
        }

        debug!(page_size, has_token = page_token.is_some(), "listing users");
        self.call(
            "list_users",
            self.inner.backend.list_users(page_size, page_token),
        )
        .await
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("project_id", &self.project_id())
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}
