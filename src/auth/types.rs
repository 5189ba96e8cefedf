//! User management types
//!
//! # REST Reference
//! - `UserInfo` resource: <https://cloud.google.com/identity-platform/docs/reference/rest/v1/UserInfo>
//! - `accounts.update` request body for the clear-on-empty semantics

use crate::error::FirebaseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Custom claims attached to a user or embedded in a custom token
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Maximum length of a uid, in characters
pub const MAX_UID_LENGTH: usize = 128;

/// Minimum length of a password, in characters
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Maximum size of serialized custom user claims, in bytes
pub const MAX_CLAIMS_PAYLOAD_SIZE: usize = 1000;

/// Maximum number of users returned by one listing round trip
pub const MAX_LIST_USERS_RESULTS: usize = 1000;

/// Claim names owned by the token issuer
///
/// Developer claims may not use these names, neither in custom tokens nor in
/// custom user claims.
pub const RESERVED_CLAIMS: &[&str] = &[
    "acr", "amr", "at_hash", "aud", "auth_time", "azp", "cnf", "c_hash", "exp", "firebase",
    "iat", "iss", "jti", "nbf", "nonce", "sub",
];

/// User metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Timestamp when user was created (Unix timestamp in milliseconds)
    pub creation_timestamp: i64,

    /// Timestamp of last sign-in (Unix timestamp in milliseconds, 0 if never)
    pub last_sign_in_timestamp: i64,
}

/// Identity provider information linked to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User ID from the provider
    pub uid: String,

    /// Display name
    pub display_name: Option<String>,

    /// Email address
    pub email: Option<String>,

    /// Phone number
    pub phone_number: Option<String>,

    /// Photo URL
    pub photo_url: Option<String>,

    /// Provider ID (e.g., "password", "phone", "google.com")
    pub provider_id: String,
}

/// A user account as stored by the backend
///
/// Records are snapshots: mutate the account through
/// [`Auth::update_user`](crate::Auth::update_user) and fetch a fresh record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user identifier, immutable after creation
    pub uid: String,

    /// Email address (if available)
    pub email: Option<String>,

    /// Phone number in E.164 format (if available)
    pub phone_number: Option<String>,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// Photo URL (if available)
    pub photo_url: Option<String>,

    /// Whether the account is disabled
    pub disabled: bool,

    /// Whether email is verified
    pub email_verified: bool,

    /// Custom claims set via [`Auth::set_custom_user_claims`](crate::Auth::set_custom_user_claims)
    #[serde(default)]
    pub custom_claims: Claims,

    /// ID tokens issued before this time (Unix milliseconds) are revoked
    pub tokens_valid_after_millis: i64,

    /// User metadata
    pub metadata: UserMetadata,

    /// Provider data for this user
    #[serde(default)]
    pub provider_data: Vec<UserInfo>,
}

impl UserRecord {
    /// Create an empty record for a uid with backend defaults everywhere else
    pub(crate) fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            phone_number: None,
            display_name: None,
            photo_url: None,
            disabled: false,
            email_verified: false,
            custom_claims: Claims::new(),
            tokens_valid_after_millis: 0,
            metadata: UserMetadata::default(),
            provider_data: vec![],
        }
    }
}

/// Secondary identifier a user can be looked up by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    /// Primary key
    Uid(String),
    /// Unique if present
    Email(String),
    /// Unique if present, E.164
    PhoneNumber(String),
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Uid(uid) => write!(f, "uid {:?}", uid),
            UserKey::Email(email) => write!(f, "email {:?}", email),
            UserKey::PhoneNumber(phone) => write!(f, "phone number {:?}", phone),
        }
    }
}

/// One page of a user listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPage {
    /// Users in backend order, never more than the requested page size
    pub users: Vec<UserRecord>,

    /// Token to resume from; `None` exactly when no further pages exist
    pub next_page_token: Option<String>,
}

/// Properties for a new user account
///
/// Every field is optional. Unset fields get backend defaults; the backend
/// assigns a uid when none is given.
///
/// # Example
/// ```
/// use firebase_admin_rs::auth::types::UserToCreate;
///
/// let user = UserToCreate::new()
///     .email("user@example.com")
///     .email_verified(false)
///     .phone_number("+15555550100")
///     .password("secretPassword")
///     .display_name("John Doe")
///     .photo_url("http://www.example.com/12345678/photo.png")
///     .disabled(false);
/// ```
#[derive(Default, Clone)]
pub struct UserToCreate {
    pub(crate) uid: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) phone_number: Option<String>,
    pub(crate) display_name: Option<String>,
    pub(crate) photo_url: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) email_verified: Option<bool>,
    pub(crate) disabled: Option<bool>,
}

impl UserToCreate {
    /// Start with every field unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific uid instead of a backend-assigned one
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the primary email
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the primary phone number (E.164)
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Set the display name
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the photo URL
    pub fn photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Set the raw password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set whether the email is verified
    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(verified);
        self
    }

    /// Set whether the account starts disabled
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Check every present field before anything is sent
    pub(crate) fn validate(&self) -> Result<(), FirebaseError> {
        if let Some(uid) = &self.uid {
            validate_uid(uid)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(phone) = &self.phone_number {
            validate_phone_number(phone)?;
        }
        if let Some(name) = &self.display_name {
            if name.is_empty() {
                return Err(FirebaseError::invalid_argument(
                    "display name must be a non-empty string",
                ));
            }
        }
        if let Some(url) = &self.photo_url {
            validate_photo_url(url)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

impl fmt::Debug for UserToCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserToCreate")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("phone_number", &self.phone_number)
            .field("display_name", &self.display_name)
            .field("photo_url", &self.photo_url)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("email_verified", &self.email_verified)
            .field("disabled", &self.disabled)
            .finish()
    }
}

/// Changes to apply to an existing user account
///
/// Only fields that were explicitly set are sent. Setting the display name,
/// photo URL or phone number to an empty string removes that attribute;
/// setting custom claims to an empty map removes all claims. Custom claims
/// given here replace the stored set wholesale.
///
/// # Example
/// ```
/// use firebase_admin_rs::auth::types::UserToUpdate;
///
/// // Change the email, drop the photo, leave everything else alone
/// let update = UserToUpdate::new()
///     .email("new@example.com")
///     .photo_url("");
/// ```
#[derive(Default, Clone)]
pub struct UserToUpdate {
    pub(crate) email: Option<String>,
    pub(crate) phone_number: Option<String>,
    pub(crate) display_name: Option<String>,
    pub(crate) photo_url: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) email_verified: Option<bool>,
    pub(crate) disabled: Option<bool>,
    pub(crate) custom_claims: Option<Claims>,
    /// Seconds since epoch; set by `revoke_refresh_tokens`
    pub(crate) valid_since: Option<i64>,
}

impl UserToUpdate {
    /// Start with every field unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the primary email
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Replace the phone number; an empty string removes it
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Replace the display name; an empty string removes it
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Replace the photo URL; an empty string removes it
    pub fn photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Replace the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set whether the email is verified
    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(verified);
        self
    }

    /// Enable or disable the account
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Replace all custom claims; an empty map removes them
    pub fn custom_claims(mut self, claims: Claims) -> Self {
        self.custom_claims = Some(claims);
        self
    }

    pub(crate) fn valid_since(mut self, seconds: i64) -> Self {
        self.valid_since = Some(seconds);
        self
    }

    /// True when no field was set
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone_number.is_none()
            && self.display_name.is_none()
            && self.photo_url.is_none()
            && self.password.is_none()
            && self.email_verified.is_none()
            && self.disabled.is_none()
            && self.custom_claims.is_none()
            && self.valid_since.is_none()
    }

    /// Check every present field before anything is sent
    pub(crate) fn validate(&self) -> Result<(), FirebaseError> {
        if self.is_empty() {
            return Err(FirebaseError::invalid_argument(
                "update parameters must not be empty",
            ));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(phone) = &self.phone_number {
            if !phone.is_empty() {
                validate_phone_number(phone)?;
            }
        }
        if let Some(url) = &self.photo_url {
            if !url.is_empty() {
                validate_photo_url(url)?;
            }
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        if let Some(claims) = &self.custom_claims {
            validate_custom_user_claims(claims)?;
        }
        Ok(())
    }
}

impl fmt::Debug for UserToUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserToUpdate")
            .field("email", &self.email)
            .field("phone_number", &self.phone_number)
            .field("display_name", &self.display_name)
            .field("photo_url", &self.photo_url)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("email_verified", &self.email_verified)
            .field("disabled", &self.disabled)
            .field("custom_claims", &self.custom_claims)
            .field("valid_since", &self.valid_since)
            .finish()
    }
}

/// Validate a uid: non-empty, at most [`MAX_UID_LENGTH`] characters
pub fn validate_uid(uid: &str) -> Result<(), FirebaseError> {
    if uid.is_empty() {
        return Err(FirebaseError::invalid_argument("uid must be a non-empty string"));
    }
    if uid.chars().count() > MAX_UID_LENGTH {
        return Err(FirebaseError::invalid_argument(format!(
            "uid string must not be longer than {} characters",
            MAX_UID_LENGTH
        )));
    }
    Ok(())
}

/// Validate an email: exactly one `@` with something on both sides
pub fn validate_email(email: &str) -> Result<(), FirebaseError> {
    let mut parts = email.split('@');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    );
    if !valid {
        return Err(FirebaseError::invalid_argument(format!(
            "malformed email string: {:?}",
            email
        )));
    }
    Ok(())
}

/// Validate a phone number: E.164, `+` then 1 to 15 digits, no leading zero
pub fn validate_phone_number(phone: &str) -> Result<(), FirebaseError> {
    let Some(digits) = phone.strip_prefix('+') else {
        return Err(FirebaseError::invalid_argument(format!(
            "phone number must be a valid, E.164 compliant identifier: {:?}",
            phone
        )));
    };
    let valid = !digits.is_empty()
        && digits.len() <= 15
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0');
    if !valid {
        return Err(FirebaseError::invalid_argument(format!(
            "phone number must be a valid, E.164 compliant identifier: {:?}",
            phone
        )));
    }
    Ok(())
}

/// Validate a password length
pub fn validate_password(password: &str) -> Result<(), FirebaseError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(FirebaseError::invalid_argument(format!(
            "password must be a string at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Validate a photo URL parses as an absolute URL
pub fn validate_photo_url(url: &str) -> Result<(), FirebaseError> {
    match reqwest::Url::parse(url) {
        Err(e) => Err(FirebaseError::invalid_argument(format!(
            "malformed photo URL {:?}: {}",
            url, e
        ))),
        Ok(_) => Ok(()),
    }
}

/// Reject developer claims that collide with issuer-owned names
pub fn validate_developer_claims(claims: &Claims) -> Result<(), FirebaseError> {
    let mut reserved: Vec<&str> = claims
        .keys()
        .map(String::as_str)
        .filter(|k| RESERVED_CLAIMS.contains(k))
        .collect();
    if reserved.is_empty() {
        return Ok(());
    }
    reserved.sort_unstable();
    Err(FirebaseError::invalid_argument(format!(
        "developer claims {} are reserved and cannot be specified",
        reserved.join(", ")
    )))
}

/// Validate custom user claims: no reserved names, bounded serialized size
pub fn validate_custom_user_claims(claims: &Claims) -> Result<(), FirebaseError> {
    validate_developer_claims(claims)?;
    let serialized = match serde_json::to_string(claims) {
        Err(e) => {
            return Err(FirebaseError::invalid_argument(format!(
                "custom claims are not serializable: {}",
                e
            )))
        }
        Ok(s) => s,
    };
    if serialized.len() > MAX_CLAIMS_PAYLOAD_SIZE {
        return Err(FirebaseError::invalid_argument(format!(
            "serialized custom claims must not exceed {} bytes",
            MAX_CLAIMS_PAYLOAD_SIZE
        )));
    }
    Ok(())
}
