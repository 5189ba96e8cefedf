//! Firebase Admin error types
//!
//! Provides a unified error type for all admin operations.
//!
//! # REST Reference
//! - Identity Toolkit error codes: `{"error": {"code": 400, "message": "USER_NOT_FOUND"}}`
//! - Cloud Storage JSON API: HTTP status codes
//!
//! # Design
//! Uses thiserror for ergonomic error definitions. Transport failures from
//! `reqwest` are classified on conversion so callers only ever see the
//! taxonomy below, never a raw HTTP error.

use thiserror::Error;

/// Top-level Firebase Admin error type
///
/// Every public operation in this crate returns `Result<T, FirebaseError>`.
/// Nothing in the library panics or exits on a remote failure.
///
/// # Example
/// ```
/// use firebase_admin_rs::{FirebaseError, TokenError};
///
/// let err: FirebaseError = TokenError::Expired.into();
/// assert!(err.requires_reauthentication());
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirebaseError {
    /// Bad or missing local configuration (credentials, project, bucket)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input, caught locally or rejected by the backend
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No record matched the lookup
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uid, email or phone number collided with an existing record
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// ID token verification failed
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Backend unreachable or answered with a 5xx
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The call exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Unclassified remote failure
    #[error("Backend error {code}: {message}")]
    Backend {
        /// Backend error code (e.g. `PERMISSION_DENIED`)
        code: String,
        /// Detail message, possibly empty
        message: String,
    },
}

/// ID token verification failures
///
/// Callers that only care about "valid or not" can match on
/// `FirebaseError::Token(_)`; callers that need to distinguish "prompt the
/// user to sign in again" from "reject outright" match on the reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token `exp` is in the past
    #[error("ID token has expired")]
    Expired,

    /// Token is not a well-formed JWT
    #[error("ID token is malformed: {0}")]
    Malformed(String),

    /// Refresh tokens were revoked after the token was issued
    #[error("ID token has been revoked")]
    Revoked,

    /// Signature does not match any published key
    #[error("ID token has an invalid signature")]
    InvalidSignature,

    /// A registered claim (aud, iss, sub, ...) has an unexpected value
    #[error("ID token has an invalid claim: {0}")]
    InvalidClaim(String),

    /// The user the token belongs to is disabled
    #[error("User account for the ID token is disabled")]
    UserDisabled,
}

impl FirebaseError {
    /// Create a configuration error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error from a string
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a catch-all backend error
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Timeout(_))
    }

    /// Check if error means no matching record exists
    ///
    /// Useful for callers that want idempotent deletes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if the caller should sign the user in again
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::Expired) | Self::Token(TokenError::Revoked)
        )
    }

    /// Create from an Identity Toolkit error message
    ///
    /// The backend reports errors as `"CODE"` or `"CODE : detail"`.
    pub fn from_error_code(message: &str) -> Self {
        let (code, detail) = match message.split_once(" : ") {
            None => (message.trim(), String::new()),
            Some((code, detail)) => (code.trim(), detail.trim().to_string()),
        };
        let detail_or = |fallback: &str| {
            if detail.is_empty() {
                fallback.to_string()
            } else {
                detail.clone()
            }
        };

        match code {
            "USER_NOT_FOUND" | "EMAIL_NOT_FOUND" => {
                Self::NotFound(detail_or("no user record found for the given identifier"))
            }
            "DUPLICATE_LOCAL_ID" | "UID_ALREADY_EXISTS" => {
                Self::AlreadyExists(detail_or("the user with the provided uid already exists"))
            }
            "EMAIL_EXISTS" | "DUPLICATE_EMAIL" => {
                Self::AlreadyExists(detail_or("the user with the provided email already exists"))
            }
            "PHONE_NUMBER_EXISTS" => Self::AlreadyExists(detail_or(
                "the user with the provided phone number already exists",
            )),
            "INVALID_EMAIL" => Self::InvalidArgument(detail_or("invalid email")),
            "INVALID_PHONE_NUMBER" => Self::InvalidArgument(detail_or("invalid phone number")),
            "WEAK_PASSWORD" | "INVALID_PASSWORD" => {
                Self::InvalidArgument(detail_or("password must be at least 6 characters"))
            }
            "INVALID_PAGE_SELECTION" | "INVALID_PAGE_TOKEN" => {
                Self::InvalidArgument(detail_or("invalid page token"))
            }
            "INVALID_CLAIMS" | "CLAIMS_TOO_LARGE" | "FORBIDDEN_CLAIM" => {
                Self::InvalidArgument(detail_or("invalid custom claims"))
            }
            "INVALID_ID_TOKEN" => Self::Token(TokenError::Malformed(detail_or("invalid id token"))),
            "TOKEN_EXPIRED" => Self::Token(TokenError::Expired),
            "USER_DISABLED" => Self::Token(TokenError::UserDisabled),
            "CONFIGURATION_NOT_FOUND" | "PROJECT_NOT_FOUND" => {
                Self::Config(detail_or("project is not configured for Firebase Auth"))
            }
            "INTERNAL_ERROR" | "UNAVAILABLE" => {
                Self::ServiceUnavailable(detail_or("backend internal error"))
            }
            "DEADLINE_EXCEEDED" => Self::Timeout(detail_or("backend deadline exceeded")),
            _ => Self::backend(code, detail),
        }
    }

    /// Create from a failed response of a Google API
    ///
    /// Identity Toolkit puts a machine code such as `EMAIL_EXISTS` in
    /// `error.message`; other APIs put prose there, which is kept as the
    /// message of a status-derived error. Unknown codes on a 5xx stay
    /// retryable.
    pub fn from_response(status: u16, message: &str) -> Self {
        if is_error_code(message) {
            let err = Self::from_error_code(message);
            if status < 500 || !matches!(err, Self::Backend { .. }) {
                return err;
            }
        }
        if message.is_empty() {
            return Self::from_status(status, format!("backend returned HTTP {}", status));
        }
        Self::from_status(status, message)
    }

    /// Create from an HTTP status when the body carried no usable error code
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::InvalidArgument(message),
            404 => Self::NotFound(message),
            409 => Self::AlreadyExists(message),
            408 | 504 => Self::Timeout(message),
            500..=599 => Self::ServiceUnavailable(message),
            _ => Self::backend(format!("HTTP_{}", status), message),
        }
    }
}

/// `CODE` or `CODE : detail`, with `CODE` in upper snake case
fn is_error_code(message: &str) -> bool {
    let code = message.split_once(" : ").map_or(message, |(code, _)| code).trim();
    code.starts_with(|c: char| c.is_ascii_uppercase())
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl From<reqwest::Error> for FirebaseError {
    fn from(err: reqwest::Error) -> Self {
        // Timeout first: a timed-out connect also reports is_connect()
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if err.is_connect() || err.is_request() {
            return Self::ServiceUnavailable(err.to_string());
        }
        if err.is_decode() {
            return Self::backend("MALFORMED_RESPONSE", err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        Self::backend("TRANSPORT", err.to_string())
    }
}
