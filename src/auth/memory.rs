//! In-process identity backend
//!
//! Holds users in a `BTreeMap` keyed by uid, which gives listings a stable
//! order, and signs tokens with HS256 using a per-instance random secret.
//! Behaves like Identity Toolkit for every contract [`Auth`](crate::Auth)
//! relies on: unique email and phone indexes, clear-on-empty updates,
//! non-idempotent deletes, opaque page tokens.
//!
//! # Example
//! ```
//! # async fn example() -> Result<(), firebase_admin_rs::FirebaseError> {
//! use firebase_admin_rs::Auth;
//! use firebase_admin_rs::auth::memory::MemoryBackend;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MemoryBackend::new("demo-project"));
//! let auth = Auth::with_backend(backend.clone());
//!
//! let token = auth.create_custom_token("some-uid").await?;
//! let id_token = backend.exchange_custom_token(&token).await?;
//! let verified = auth.verify_id_token(&id_token).await?;
//! assert_eq!(verified.uid, "some-uid");
//! # Ok(())
//! # }
//! ```

use crate::auth::backend::AuthBackend;
use async_trait::async_trait;
use crate::auth::token::{
    map_jwt_error, CustomTokenClaims, FirebaseInfo, VerifiedToken, CUSTOM_TOKEN_AUDIENCE,
    ID_TOKEN_ISSUER_PREFIX,
};
use crate::auth::types::{
    Claims, UserInfo, UserKey, UserPage, UserRecord, UserToCreate, UserToUpdate,
};
use crate::error::{FirebaseError, TokenError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default lifetime of ID tokens issued by [`MemoryBackend::issue_id_token`]
const ID_TOKEN_LIFETIME_SECS: i64 = 3600;

/// In-memory stand-in for the identity backend
pub struct MemoryBackend {
    project_id: String,
    signer: String,
    secret: Vec<u8>,
    latency: Option<Duration>,
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<String, StoredUser>,
    // Unique keys to uid
    by_email: BTreeMap<String, String>,
    by_phone: BTreeMap<String, String>,
}

struct StoredUser {
    record: UserRecord,
    password: Option<String>,
}

impl MemoryState {
    fn find_uid(&self, key: &UserKey) -> Option<String> {
        match key {
            UserKey::Uid(uid) => self.users.contains_key(uid).then(|| uid.clone()),
            UserKey::Email(email) => self.by_email.get(email).cloned(),
            UserKey::PhoneNumber(phone) => self.by_phone.get(phone).cloned(),
        }
    }

    fn index(&mut self, record: &UserRecord) {
        if let Some(email) = &record.email {
            self.by_email.insert(email.clone(), record.uid.clone());
        }
        if let Some(phone) = &record.phone_number {
            self.by_phone.insert(phone.clone(), record.uid.clone());
        }
    }

    fn unindex(&mut self, record: &UserRecord) {
        if let Some(email) = &record.email {
            self.by_email.remove(email);
        }
        if let Some(phone) = &record.phone_number {
            self.by_phone.remove(phone);
        }
    }

    /// Fails when `key` belongs to someone other than `owner`
    fn ensure_unclaimed(&self, key: UserKey, owner: Option<&str>) -> Result<(), FirebaseError> {
        let Some(existing) = self.find_uid(&key) else {
            return Ok(());
        };
        if Some(existing.as_str()) == owner {
            return Ok(());
        }
        Err(FirebaseError::AlreadyExists(format!(
            "the user with the provided {} already exists",
            key
        )))
    }
}

impl MemoryBackend {
    /// Create an empty backend for `project_id`
    pub fn new(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        Self {
            signer: format!("memory-backend@{}.iam.gserviceaccount.com", project_id),
            project_id,
            secret,
            latency: None,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Delay every call by `latency`, to exercise deadlines
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of stored users
    pub async fn len(&self) -> usize {
        self.state.read().await.users.len()
    }

    /// True when no user is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Trade a custom token for an ID token, as a client sign-in would
    ///
    /// Creates the user on first sign-in. The ID token carries the user's
    /// custom claims merged with the developer claims embedded in the custom
    /// token.
    pub async fn exchange_custom_token(&self, custom_token: &str) -> Result<String, FirebaseError> {
        self.delay().await;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[CUSTOM_TOKEN_AUDIENCE]);
        validation.set_issuer(&[self.signer.as_str()]);
        let data = match decode::<CustomTokenClaims>(
            custom_token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        ) {
            Err(e) => {
                return Err(FirebaseError::invalid_argument(format!(
                    "invalid custom token: {}",
                    map_jwt_error(e)
                )))
            }
            Ok(data) => data,
        };
        let claims = data.claims;

        let now = Utc::now();
        let mut extra = {
            let mut state = self.state.write().await;
            let stored = state
                .users
                .entry(claims.uid.clone())
                .or_insert_with(|| StoredUser {
                    record: UserRecord {
                        metadata: crate::auth::types::UserMetadata {
                            creation_timestamp: now.timestamp_millis(),
                            last_sign_in_timestamp: 0,
                        },
                        ..UserRecord::with_uid(claims.uid.clone())
                    },
                    password: None,
                });
            if stored.record.disabled {
                return Err(TokenError::UserDisabled.into());
            }
            stored.record.metadata.last_sign_in_timestamp = now.timestamp_millis();
            stored.record.custom_claims.clone()
        };
        if let Some(developer) = claims.claims {
            extra.extend(developer);
        }

        self.sign_id_token(&claims.uid, "custom", extra, now, chrono::Duration::seconds(ID_TOKEN_LIFETIME_SECS))
    }

    /// Issue a fresh one-hour ID token for `uid`
    pub async fn issue_id_token(&self, uid: &str) -> Result<String, FirebaseError> {
        self.issue_id_token_at(uid, Utc::now(), chrono::Duration::seconds(ID_TOKEN_LIFETIME_SECS))
            .await
    }

    /// Issue an ID token as if the user signed in at `auth_time`
    ///
    /// The token is issued at `auth_time` and lives for `lifetime`, so a past
    /// `auth_time` with a short lifetime yields an expired token. Custom claims
    /// of an existing user are embedded; unknown uids get none.
    pub async fn issue_id_token_at(
        &self,
        uid: &str,
        auth_time: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Result<String, FirebaseError> {
        let claims = {
            let state = self.state.read().await;
            state
                .users
                .get(uid)
                .map(|u| u.record.custom_claims.clone())
                .unwrap_or_default()
        };
        self.sign_id_token(uid, "password", claims, auth_time, lifetime)
    }

    fn sign_id_token(
        &self,
        uid: &str,
        provider: &str,
        extra: Claims,
        auth_time: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Result<String, FirebaseError> {
        let mut claims = extra;
        claims.insert("user_id".to_string(), uid.into());
        let token = VerifiedToken {
            uid: uid.to_string(),
            issuer: format!("{}{}", ID_TOKEN_ISSUER_PREFIX, self.project_id),
            audience: self.project_id.clone(),
            issued_at: auth_time,
            expires_at: auth_time + lifetime,
            auth_time,
            firebase: FirebaseInfo {
                sign_in_provider: provider.to_string(),
                tenant: None,
                identities: Claims::new(),
            },
            claims,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &token,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| FirebaseError::backend("SIGNING_FAILED", e.to_string()))
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("project_id", &self.project_id)
            .field("secret", &"<redacted>")
            .field("latency", &self.latency)
            .finish()
    }
}

fn encode_page_token(uid: &str) -> String {
    URL_SAFE_NO_PAD.encode(uid.as_bytes())
}

fn decode_page_token(token: &str) -> Result<String, FirebaseError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| FirebaseError::invalid_argument("invalid page token"))
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn get_user(&self, key: UserKey) -> Result<UserRecord, FirebaseError> {
        self.delay().await;
        let state = self.state.read().await;
        state
            .find_uid(&key)
            .and_then(|uid| state.users.get(&uid))
            .map(|u| u.record.clone())
            .ok_or_else(|| FirebaseError::NotFound(format!("no user record found for {}", key)))
    }

    async fn create_user(&self, user: UserToCreate) -> Result<String, FirebaseError> {
        self.delay().await;
        let mut state = self.state.write().await;

        let uid = match user.uid {
            None => uuid::Uuid::new_v4().simple().to_string(),
            Some(uid) => uid,
        };
        if state.users.contains_key(&uid) {
            return Err(FirebaseError::AlreadyExists(format!(
                "the user with the provided uid {:?} already exists",
                uid
            )));
        }
        if let Some(email) = &user.email {
            state.ensure_unclaimed(UserKey::Email(email.clone()), None)?;
        }
        if let Some(phone) = &user.phone_number {
            state.ensure_unclaimed(UserKey::PhoneNumber(phone.clone()), None)?;
        }

        let mut record = UserRecord::with_uid(uid.clone());
        record.email = user.email;
        record.phone_number = user.phone_number;
        record.display_name = user.display_name;
        record.photo_url = user.photo_url;
        record.email_verified = user.email_verified.unwrap_or(false);
        record.disabled = user.disabled.unwrap_or(false);
        record.metadata.creation_timestamp = Utc::now().timestamp_millis();
        record.provider_data = provider_data(&record, user.password.is_some());

        debug!(uid = %uid, "memory backend: created user");
        state.index(&record);
        state.users.insert(
            uid.clone(),
            StoredUser {
                record,
                password: user.password,
            },
        );
        Ok(uid)
    }

    async fn update_user(&self, uid: String, update: UserToUpdate) -> Result<(), FirebaseError> {
        self.delay().await;
        let mut state = self.state.write().await;

        if !state.users.contains_key(&uid) {
            return Err(FirebaseError::NotFound(format!(
                "no user record found for uid {:?}",
                uid
            )));
        }
        if let Some(email) = &update.email {
            state.ensure_unclaimed(UserKey::Email(email.clone()), Some(&uid))?;
        }
        if let Some(phone) = update.phone_number.as_ref().filter(|p| !p.is_empty()) {
            state.ensure_unclaimed(UserKey::PhoneNumber(phone.clone()), Some(&uid))?;
        }

        let Some(mut stored) = state.users.remove(&uid) else {
            return Err(FirebaseError::NotFound(format!(
                "no user record found for uid {:?}",
                uid
            )));
        };
        state.unindex(&stored.record);
        let record = &mut stored.record;
        if let Some(email) = update.email {
            record.email = Some(email);
        }
        if let Some(phone) = update.phone_number {
            record.phone_number = non_empty(phone);
        }
        if let Some(name) = update.display_name {
            record.display_name = non_empty(name);
        }
        if let Some(url) = update.photo_url {
            record.photo_url = non_empty(url);
        }
        if let Some(verified) = update.email_verified {
            record.email_verified = verified;
        }
        if let Some(disabled) = update.disabled {
            record.disabled = disabled;
        }
        if let Some(claims) = update.custom_claims {
            record.custom_claims = claims;
        }
        if let Some(seconds) = update.valid_since {
            record.tokens_valid_after_millis = seconds * 1000;
        }
        if let Some(password) = update.password {
            stored.password = Some(password);
        }
        let has_password = stored.password.is_some();
        stored.record.provider_data = provider_data(&stored.record, has_password);
        state.index(&stored.record);
        state.users.insert(uid.clone(), stored);

        debug!(uid = %uid, "memory backend: updated user");
        Ok(())
    }

    async fn delete_user(&self, uid: String) -> Result<(), FirebaseError> {
        self.delay().await;
        let mut state = self.state.write().await;
        match state.users.remove(&uid) {
            None => Err(FirebaseError::NotFound(format!(
                "no user record found for uid {:?}",
                uid
            ))),
            Some(stored) => {
                state.unindex(&stored.record);
                Ok(())
            }
        }
    }

    async fn list_users(&self, page_size: usize, page_token: Option<String>) -> Result<UserPage, FirebaseError> {
        self.delay().await;
        let start = match page_token.as_deref() {
            None | Some("") => Bound::Unbounded,
            Some(token) => Bound::Excluded(decode_page_token(token)?),
        };

        let state = self.state.read().await;
        let mut remaining = state.users.range((start, Bound::Unbounded));
        let users: Vec<UserRecord> = remaining
            .by_ref()
            .take(page_size)
            .map(|(_, u)| u.record.clone())
            .collect();

        // Only hand out a token when something follows this page
        let next_page_token = match (remaining.next(), users.last()) {
            (Some(_), Some(last)) => Some(encode_page_token(&last.uid)),
            _ => None,
        };

        Ok(UserPage {
            users,
            next_page_token,
        })
    }

    async fn sign_custom_token(&self, mut claims: CustomTokenClaims) -> Result<String, FirebaseError> {
        self.delay().await;
        claims.iss = self.signer.clone();
        claims.sub = self.signer.clone();
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| FirebaseError::backend("SIGNING_FAILED", e.to_string()))
    }

    async fn verify_id_token(&self, token: String) -> Result<VerifiedToken, FirebaseError> {
        self.delay().await;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[format!("{}{}", ID_TOKEN_ISSUER_PREFIX, self.project_id)]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let data = decode::<VerifiedToken>(&token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(map_jwt_error)?;
        data.claims.check_claims(&self.project_id, Utc::now())?;
        Ok(data.claims)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn provider_data(record: &UserRecord, has_password: bool) -> Vec<UserInfo> {
    let mut providers = vec![];
    if let (Some(email), true) = (&record.email, has_password) {
        providers.push(UserInfo {
            uid: email.clone(),
            display_name: record.display_name.clone(),
            email: Some(email.clone()),
            phone_number: None,
            photo_url: record.photo_url.clone(),
            provider_id: "password".to_string(),
        });
    }
    if let Some(phone) = &record.phone_number {
        providers.push(UserInfo {
            uid: phone.clone(),
            display_name: None,
            email: None,
            phone_number: Some(phone.clone()),
            photo_url: None,
            provider_id: "phone".to_string(),
        });
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_page_tokens_only_when_more_remain() {
        let backend = MemoryBackend::new("p");
        for uid in ["a", "b", "c"] {
            backend.create_user(UserToCreate::new().uid(uid)).await.unwrap();
        }

        let page = backend.list_users(2, None).await.unwrap();
        assert_eq!(page.users.len(), 2);
        let token = page.next_page_token.expect("more users follow");

        let page = backend.list_users(2, Some(token)).await.unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].uid, "c");
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_exact_page_boundary_has_no_token() {
        let backend = MemoryBackend::new("p");
        for uid in ["a", "b"] {
            backend.create_user(UserToCreate::new().uid(uid)).await.unwrap();
        }
        let page = backend.list_users(2, None).await.unwrap();
        assert_eq!(page.users.len(), 2);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_bad_page_token() {
        let backend = MemoryBackend::new("p");
        let result = backend.list_users(10, Some("%%%".to_string())).await;
        assert!(matches!(result, Err(FirebaseError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_phone_uniqueness_ignores_owner() {
        let backend = MemoryBackend::new("p");
        backend
            .create_user(UserToCreate::new().uid("a").phone_number("+15555550100"))
            .await
            .unwrap();

        // Re-setting your own number is fine
        backend
            .update_user("a".to_string(), UserToUpdate::new().phone_number("+15555550100"))
            .await
            .unwrap();

        backend.create_user(UserToCreate::new().uid("b")).await.unwrap();
        let result = backend
            .update_user("b".to_string(), UserToUpdate::new().phone_number("+15555550100"))
            .await;
        assert!(matches!(result, Err(FirebaseError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_lookup_index_follows_changes() {
        let backend = MemoryBackend::new("p");
        backend
            .create_user(UserToCreate::new().uid("a").email("old@example.com"))
            .await
            .unwrap();
        backend
            .update_user("a".to_string(), UserToUpdate::new().email("new@example.com"))
            .await
            .unwrap();

        let by_new = backend
            .get_user(UserKey::Email("new@example.com".to_string()))
            .await
            .unwrap();
        assert_eq!(by_new.uid, "a");
        assert!(matches!(
            backend.get_user(UserKey::Email("old@example.com".to_string())).await,
            Err(FirebaseError::NotFound(_))
        ));

        // The released address can be claimed again
        backend
            .create_user(UserToCreate::new().uid("b").email("old@example.com"))
            .await
            .unwrap();

        backend.delete_user("a".to_string()).await.unwrap();
        assert!(matches!(
            backend.get_user(UserKey::Email("new@example.com".to_string())).await,
            Err(FirebaseError::NotFound(_))
        ));
        backend
            .create_user(UserToCreate::new().uid("c").email("new@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provider_data_follows_fields() {
        let backend = MemoryBackend::new("p");
        backend
            .create_user(
                UserToCreate::new()
                    .uid("a")
                    .email("a@example.com")
                    .password("secretPassword")
                    .phone_number("+15555550100"),
            )
            .await
            .unwrap();
        let user = backend.get_user(UserKey::Uid("a".to_string())).await.unwrap();
        let providers: Vec<&str> = user.provider_data.iter().map(|p| p.provider_id.as_str()).collect();
        assert_eq!(providers, vec!["password", "phone"]);

        backend
            .update_user("a".to_string(), UserToUpdate::new().phone_number(""))
            .await
            .unwrap();
        let user = backend.get_user(UserKey::Uid("a".to_string())).await.unwrap();
        assert_eq!(user.provider_data.len(), 1);
        assert!(user.phone_number.is_none());
    }

    #[tokio::test]
    async fn test_exchange_rejects_foreign_token() {
        let a = MemoryBackend::new("p");
        let b = MemoryBackend::new("p");
        let token = a
            .sign_custom_token(CustomTokenClaims::new("", "uid", None, Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            b.exchange_custom_token(&token).await,
            Err(FirebaseError::InvalidArgument(_))
        ));
        assert!(a.exchange_custom_token(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_exchange_creates_user_on_first_sign_in() {
        let backend = MemoryBackend::new("p");
        let token = backend
            .sign_custom_token(CustomTokenClaims::new("", "new-uid", None, Utc::now()))
            .await
            .unwrap();
        assert!(backend.is_empty().await);
        backend.exchange_custom_token(&token).await.unwrap();
        assert_eq!(backend.len().await, 1);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let backend = MemoryBackend::new("p");
        let debug = format!("{:?}", backend);
        assert!(debug.contains("<redacted>"));
    }
}
