//! Custom token and ID token claim sets
//!
//! Signing and signature checks are done by the backend (see
//! [`AuthBackend`](crate::auth::backend::AuthBackend)); this module owns the
//! claim layouts and the structural checks that run before any key is
//! involved.
//!
//! # REST Reference
//! - Custom token format: <https://firebase.google.com/docs/auth/admin/create-custom-tokens#create_custom_tokens_using_a_third-party_jwt_library>
//! - ID token format: <https://firebase.google.com/docs/auth/admin/verify-id-tokens#verify_id_tokens_using_a_third-party_jwt_library>

use crate::auth::types::{validate_uid, Claims};
use crate::error::{FirebaseError, TokenError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Audience of every custom token
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Issuer prefix of ID tokens; the project id follows
pub const ID_TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Lifetime of a minted custom token, in seconds
pub const CUSTOM_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Allowed clock skew for `iat` / `auth_time`, in seconds
pub const CLOCK_SKEW_SECS: i64 = 300;

/// Payload of a custom token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTokenClaims {
    /// Service account that signed the token
    pub iss: String,
    /// Same as `iss`
    pub sub: String,
    /// Always [`CUSTOM_TOKEN_AUDIENCE`]
    pub aud: String,
    /// Issued at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// User the token signs in as
    pub uid: String,
    /// Developer claims copied into the resulting ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl CustomTokenClaims {
    /// Build the payload for `uid`, signed by `signer`
    pub fn new(signer: &str, uid: &str, claims: Option<Claims>, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: signer.to_string(),
            sub: signer.to_string(),
            aud: CUSTOM_TOKEN_AUDIENCE.to_string(),
            iat,
            exp: iat + CUSTOM_TOKEN_LIFETIME_SECS,
            uid: uid.to_string(),
            // An empty map embeds nothing
            claims: claims.filter(|c| !c.is_empty()),
        }
    }
}

/// Firebase-specific section of an ID token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirebaseInfo {
    /// How the user signed in (e.g. "password", "custom", "google.com")
    #[serde(default)]
    pub sign_in_provider: String,

    /// Tenant the user belongs to, for multi-tenant projects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Provider identities linked to the user
    #[serde(default)]
    pub identities: Claims,
}

/// Decoded claims of an ID token that passed verification
///
/// # Example
/// ```no_run
/// # async fn example(auth: firebase_admin_rs::Auth, id_token: &str) -> Result<(), firebase_admin_rs::FirebaseError> {
/// let token = auth.verify_id_token(id_token).await?;
/// println!("Verified ID token for {}", token.uid);
/// if token.claims.get("admin") == Some(&serde_json::json!(true)) {
///     println!("admin user");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedToken {
    /// User the token belongs to
    #[serde(rename = "sub")]
    pub uid: String,

    /// `https://securetoken.google.com/<project-id>`
    #[serde(rename = "iss")]
    pub issuer: String,

    /// Project id
    #[serde(rename = "aud")]
    pub audience: String,

    /// When the token was issued
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    /// When the token expires
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// When the user actually signed in
    #[serde(with = "chrono::serde::ts_seconds")]
    pub auth_time: DateTime<Utc>,

    /// Sign-in details
    #[serde(default)]
    pub firebase: FirebaseInfo,

    /// Every other claim, including custom claims
    #[serde(flatten)]
    pub claims: Claims,
}

impl VerifiedToken {
    /// Check the registered claims a signature check does not cover
    ///
    /// `aud`, `iss` and `exp` are also checked by the signature validator for
    /// signed tokens; unsigned emulator tokens rely on this alone.
    pub(crate) fn check_claims(&self, project_id: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
        if self.audience != project_id {
            return Err(TokenError::InvalidClaim(format!(
                "expected audience {:?} but got {:?}",
                project_id, self.audience
            )));
        }
        let expected_issuer = format!("{}{}", ID_TOKEN_ISSUER_PREFIX, project_id);
        if self.issuer != expected_issuer {
            return Err(TokenError::InvalidClaim(format!(
                "expected issuer {:?} but got {:?}",
                expected_issuer, self.issuer
            )));
        }
        if validate_uid(&self.uid).is_err() {
            return Err(TokenError::InvalidClaim(
                "subject must be a non-empty string of at most 128 characters".to_string(),
            ));
        }
        if self.expires_at <= now {
            return Err(TokenError::Expired);
        }
        let skew = chrono::Duration::seconds(CLOCK_SKEW_SECS);
        if self.issued_at - skew > now {
            return Err(TokenError::InvalidClaim("issued in the future".to_string()));
        }
        if self.auth_time - skew > now {
            return Err(TokenError::InvalidClaim("auth_time is in the future".to_string()));
        }
        Ok(())
    }
}

/// JOSE header fields this crate looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JwtHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// A JWT split into its decoded parts, signature untouched
#[derive(Debug, Clone)]
pub(crate) struct UnverifiedJwt {
    pub header: JwtHeader,
    pub payload: serde_json::Value,
}

impl UnverifiedJwt {
    /// Deserialize the payload without checking anything
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T, TokenError> {
        match serde_json::from_value(self.payload.clone()) {
            Err(e) => Err(TokenError::Malformed(format!("unexpected payload: {}", e))),
            Ok(claims) => Ok(claims),
        }
    }
}

/// Split and decode a compact JWT
///
/// Fails with `Malformed` for anything that is not three base64url segments
/// with a JSON header and a JSON object payload.
pub(crate) fn parse_unverified(token: &str) -> Result<UnverifiedJwt, TokenError> {
    if token.is_empty() {
        return Err(TokenError::Malformed("ID token must be a non-empty string".to_string()));
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, _signature] = segments.as_slice() else {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments but got {}",
            segments.len()
        )));
    };

    let header: JwtHeader = decode_segment(header, "header")?;
    let payload: serde_json::Value = decode_segment(payload, "payload")?;
    if !payload.is_object() {
        return Err(TokenError::Malformed("payload is not a JSON object".to_string()));
    }

    Ok(UnverifiedJwt { header, payload })
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, TokenError> {
    let bytes = match URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')) {
        Err(e) => return Err(TokenError::Malformed(format!("{} is not base64url: {}", name, e))),
        Ok(bytes) => bytes,
    };
    match serde_json::from_slice(&bytes) {
        Err(e) => Err(TokenError::Malformed(format!("{} is not JSON: {}", name, e))),
        Ok(value) => Ok(value),
    }
}

/// `base64url(header) + "." + base64url(payload)`
pub(crate) fn signing_input<T: Serialize>(header: &JwtHeader, claims: &T) -> Result<String, FirebaseError> {
    let header = serde_json::to_vec(header)
        .map_err(|e| FirebaseError::invalid_argument(format!("failed to encode header: {}", e)))?;
    let payload = serde_json::to_vec(claims)
        .map_err(|e| FirebaseError::invalid_argument(format!("failed to encode claims: {}", e)))?;
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    ))
}

/// Unsigned (`alg: none`) token, accepted only by the Auth emulator
pub(crate) fn encode_unsigned<T: Serialize>(claims: &T) -> Result<String, FirebaseError> {
    let header = JwtHeader {
        alg: "none".to_string(),
        kid: None,
        typ: Some("JWT".to_string()),
    };
    Ok(format!("{}.", signing_input(&header, claims)?))
}

/// Classify a `jsonwebtoken` failure
pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAudience => TokenError::InvalidClaim("unexpected audience".to_string()),
        ErrorKind::InvalidIssuer => TokenError::InvalidClaim("unexpected issuer".to_string()),
        ErrorKind::ImmatureSignature => TokenError::InvalidClaim("token not yet valid".to_string()),
        ErrorKind::InvalidAlgorithm => {
            TokenError::Malformed("unexpected signing algorithm".to_string())
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            TokenError::Malformed(format!("missing required claim {:?}", claim))
        }
        _ => TokenError::Malformed(err.to_string()),
    }
}
